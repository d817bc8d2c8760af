//! The database client the runtime drives.
//!
//! The runtime does not speak the wire protocol itself. A [`BackendConnector`] opens
//! [`BackendConnection`]s from keyword/value parameters, and every statement comes back as a
//! fully buffered [`QueryResult`] in text format.

use std::fmt::{self, Debug, Formatter};

/// Opens connections to the database server.
pub trait BackendConnector: Send + Sync {
    /// Opens a connection from ordered keyword/value pairs (`dbname`, `host`, ...).
    ///
    /// On failure returns the client's error message.
    fn connect(&self, params: &[(String, String)]) -> Result<Box<dyn BackendConnection>, String>;
}

/// An open connection of the database client.
///
/// Operations that can fail at the transport level return `None`; the reason is then
/// available from [`error_message`](BackendConnection::error_message). Statement-level
/// failures are reported as results with an error status.
pub trait BackendConnection: Send {
    /// Runs one or more statements given as text.
    fn exec(&mut self, sql: &str) -> Option<QueryResult>;

    /// Creates the server-side prepared statement `name` with `nparams` parameters.
    fn prepare(&mut self, name: &str, sql: &str, nparams: usize) -> Option<QueryResult>;

    /// Executes the prepared statement `name`; `None` parameters are NULL.
    fn exec_prepared(&mut self, name: &str, params: &[Option<String>]) -> Option<QueryResult>;

    /// Describes the columns the prepared statement `name` returns.
    fn describe_prepared(&mut self, name: &str) -> Option<QueryResult>;

    fn transaction_status(&self) -> TransactionStatus;

    fn status(&self) -> ConnectionStatus;

    fn error_message(&self) -> String;

    /// Quotes `text` as a string constant for this connection.
    ///
    /// Returning `None` lets the runtime quote it instead.
    fn escape_literal(&self, text: &str) -> Option<String> {
        let _ = text;
        None
    }

    /// Takes the next asynchronous notification, if one arrived.
    fn notifies(&mut self) -> Option<Notification> {
        None
    }

    /// Ends a COPY the server started, discarding its data.
    fn end_copy(&mut self) {}

    /// Installs the callback receiving notices and warnings from the server.
    fn set_notice_receiver(&mut self, receiver: NoticeReceiver);

    fn close(&mut self);
}

pub type NoticeReceiver = Box<dyn Fn(&Notice) + Send + Sync>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    Active,
    InTransaction,
    InError,
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Ok,
    Bad,
}

/// A notice or warning sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub sqlstate: String,
    pub message: String,
}

/// A `NOTIFY` received on a channel the session listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub process_id: i32,
    pub payload: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResultStatus {
    EmptyQuery,
    CommandOk,
    TuplesOk,
    CopyOut,
    CopyIn,
    BadResponse,
    NonfatalError,
    FatalError,
}

/// Metadata of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: u32,

    /// Internal size of the type; negative for variable-length types.
    pub size: i32,

    /// Type modifier, such as `4 + n` for `varchar(n)`; `-1` when there is none.
    pub modifier: i32,
}

impl FieldDescription {
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
            size: -1,
            modifier: -1,
        }
    }

    pub fn size(mut self, size: i32) -> Self {
        self.size = size;
        self
    }

    pub fn modifier(mut self, modifier: i32) -> Self {
        self.modifier = modifier;
        self
    }
}

/// The diagnostic fields of a failed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultError {
    pub sqlstate: String,
    pub message: String,
}

/// A buffered statement result in text format.
#[derive(Clone, PartialEq, Eq)]
pub struct QueryResult {
    status: ResultStatus,
    fields: Vec<FieldDescription>,
    rows: Vec<Vec<Option<String>>>,
    command_tag: String,
    error: Option<ResultError>,
}

impl QueryResult {
    /// A result with rows.
    pub fn tuples(fields: Vec<FieldDescription>, rows: Vec<Vec<Option<String>>>) -> Self {
        let command_tag = format!("SELECT {}", rows.len());

        Self {
            status: ResultStatus::TuplesOk,
            fields,
            rows,
            command_tag,
            error: None,
        }
    }

    /// A completed command without rows, such as `INSERT 0 1`.
    pub fn command(tag: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::CommandOk,
            fields: Vec::new(),
            rows: Vec::new(),
            command_tag: tag.into(),
            error: None,
        }
    }

    pub fn error(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::FatalError,
            fields: Vec::new(),
            rows: Vec::new(),
            command_tag: String::new(),
            error: Some(ResultError {
                sqlstate: sqlstate.into(),
                message: message.into(),
            }),
        }
    }

    /// A result with the given status and nothing else.
    pub fn with_status(status: ResultStatus) -> Self {
        Self {
            status,
            fields: Vec::new(),
            rows: Vec::new(),
            command_tag: String::new(),
            error: None,
        }
    }

    /// The placeholder a freshly allocated descriptor holds: rows without columns.
    pub fn empty() -> Self {
        Self::tuples(Vec::new(), Vec::new())
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn ntuples(&self) -> usize {
        self.rows.len()
    }

    pub fn nfields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn field(&self, field: usize) -> Option<&FieldDescription> {
        self.fields.get(field)
    }

    /// Text of a field; `None` for SQL NULL and for positions outside the result.
    pub fn value(&self, row: usize, field: usize) -> Option<&str> {
        self.rows.get(row)?.get(field)?.as_deref()
    }

    pub fn is_null(&self, row: usize, field: usize) -> bool {
        self.value(row, field).is_none()
    }

    /// Length in bytes of a field's text; zero for NULL.
    pub fn length(&self, row: usize, field: usize) -> usize {
        self.value(row, field).map_or(0, str::len)
    }

    pub fn command_tag(&self) -> &str {
        &self.command_tag
    }

    pub fn error_fields(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }

    /// Number of rows the command affected, from the trailing count of its tag.
    pub fn cmd_tuples(&self) -> i64 {
        const COUNTED: [&str; 8] = [
            "INSERT ", "UPDATE ", "DELETE ", "SELECT ", "MOVE ", "FETCH ", "COPY ", "MERGE ",
        ];

        if !COUNTED.iter().any(|prefix| self.command_tag.starts_with(prefix)) {
            return 0;
        }

        let tag = self.command_tag.as_bytes();

        let start = memchr::memrchr(b' ', tag).map_or(0, |at| at + 1);
        atoi::atoi::<i64>(&tag[start..]).unwrap_or(0)
    }

    /// OID of the single row an `INSERT` created, or zero.
    pub fn oid_value(&self) -> u32 {
        let Some(rest) = self.command_tag.strip_prefix("INSERT ") else {
            return 0;
        };

        let end = memchr::memchr(b' ', rest.as_bytes()).unwrap_or(rest.len());
        atoi::atoi::<u32>(&rest.as_bytes()[..end]).unwrap_or(0)
    }
}

impl Debug for QueryResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("status", &self.status)
            .field("nfields", &self.fields.len())
            .field("ntuples", &self.rows.len())
            .field("command_tag", &self.command_tag)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_counts_affected_rows() {
        assert_eq!(QueryResult::command("INSERT 0 3").cmd_tuples(), 3);
        assert_eq!(QueryResult::command("UPDATE 0").cmd_tuples(), 0);
        assert_eq!(QueryResult::command("CREATE TABLE").cmd_tuples(), 0);
        assert_eq!(QueryResult::command("INSERT 16384 1").oid_value(), 16384);
        assert_eq!(QueryResult::command("DELETE 2").oid_value(), 0);
    }

    #[test]
    fn it_reads_fields() {
        let result = QueryResult::tuples(
            vec![FieldDescription::new("a", 23), FieldDescription::new("b", 25)],
            vec![
                vec![Some("1".into()), None],
                vec![Some("2".into()), Some("two".into())],
            ],
        );

        assert_eq!((result.ntuples(), result.nfields()), (2, 2));
        assert_eq!(result.value(1, 1), Some("two"));
        assert!(result.is_null(0, 1));
        assert_eq!(result.length(1, 1), 3);
        assert_eq!(result.value(5, 0), None);
        assert_eq!(result.cmd_tuples(), 2);
    }
}
