//! Types for working with errors produced by the embedded SQL runtime.

use std::fmt::{self, Display, Formatter};
use std::result::Result as StdResult;

use crate::backend::{BackendConnection, ConnectionStatus, QueryResult};
use crate::types::CompatMode;

/// A specialized `Result` type for the runtime.
pub type Result<T> = StdResult<T, Error>;

/// Legacy numeric status codes, as stored in `sqlca.sqlcode`.
pub mod code {
    pub const NO_ERROR: i64 = 0;
    pub const NOT_FOUND: i64 = 100;

    pub const OUT_OF_MEMORY: i64 = -12;
    pub const UNSUPPORTED: i64 = -200;
    pub const TOO_MANY_ARGUMENTS: i64 = -201;
    pub const TOO_FEW_ARGUMENTS: i64 = -202;
    pub const TOO_MANY_MATCHES: i64 = -203;
    pub const INT_FORMAT: i64 = -204;
    pub const UINT_FORMAT: i64 = -205;
    pub const FLOAT_FORMAT: i64 = -206;
    pub const NUMERIC_FORMAT: i64 = -207;
    pub const INTERVAL_FORMAT: i64 = -208;
    pub const DATE_FORMAT: i64 = -209;
    pub const TIMESTAMP_FORMAT: i64 = -210;
    pub const CONVERT_BOOL: i64 = -211;
    pub const EMPTY: i64 = -212;
    pub const MISSING_INDICATOR: i64 = -213;
    pub const NO_ARRAY: i64 = -214;
    pub const DATA_NOT_ARRAY: i64 = -215;
    pub const ARRAY_INSERT: i64 = -216;

    pub const NO_CONN: i64 = -220;
    pub const NOT_CONN: i64 = -221;

    pub const INVALID_STMT: i64 = -230;

    pub const INFORMIX_DUPLICATE_KEY: i64 = -239;
    pub const INFORMIX_SUBSELECT_NOT_ONE: i64 = -284;

    pub const UNKNOWN_DESCRIPTOR: i64 = -240;
    pub const INVALID_DESCRIPTOR_INDEX: i64 = -241;
    pub const UNKNOWN_DESCRIPTOR_ITEM: i64 = -242;
    pub const VAR_NOT_NUMERIC: i64 = -243;
    pub const VAR_NOT_CHAR: i64 = -244;

    pub const PGSQL: i64 = -400;
    pub const TRANS: i64 = -401;
    pub const CONNECT: i64 = -402;
    pub const DUPLICATE_KEY: i64 = -403;
    pub const SUBSELECT_NOT_ONE: i64 = -404;

    pub const WARNING_UNKNOWN_PORTAL: i64 = -602;
    pub const WARNING_IN_TRANSACTION: i64 = -603;
    pub const WARNING_NO_TRANSACTION: i64 = -604;
    pub const WARNING_PORTAL_EXISTS: i64 = -605;
}

/// Five-character SQLSTATE values produced by the runtime itself.
pub mod sqlstate {
    pub const SUCCESSFUL_COMPLETION: &str = "00000";
    pub const NO_DATA: &str = "02000";
    pub const USING_CLAUSE_DOES_NOT_MATCH_PARAMETERS: &str = "07001";
    pub const USING_CLAUSE_DOES_NOT_MATCH_TARGETS: &str = "07002";
    pub const RESTRICTED_DATA_TYPE_ATTRIBUTE_VIOLATION: &str = "07006";
    pub const INVALID_DESCRIPTOR_INDEX: &str = "07009";
    pub const SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION: &str = "08001";
    pub const CONNECTION_NAME_IN_USE: &str = "08002";
    pub const CONNECTION_DOES_NOT_EXIST: &str = "08003";
    pub const CARDINALITY_VIOLATION: &str = "21000";
    pub const NULL_VALUE_NO_INDICATOR_PARAMETER: &str = "22002";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const ACTIVE_SQL_TRANSACTION: &str = "25001";
    pub const NO_ACTIVE_SQL_TRANSACTION: &str = "25P01";
    pub const INVALID_SQL_STATEMENT_NAME: &str = "26000";
    pub const INVALID_SQL_DESCRIPTOR_NAME: &str = "33000";
    pub const INVALID_CURSOR_NAME: &str = "34000";
    pub const DATATYPE_MISMATCH: &str = "42804";
    pub const DUPLICATE_CURSOR: &str = "42P03";
    pub const ADMIN_SHUTDOWN: &str = "57P01";
    pub const CRASH_SHUTDOWN: &str = "57P02";
    pub const ECPG_INTERNAL_ERROR: &str = "YE000";
    pub const ECPG_OUT_OF_MEMORY: &str = "YE001";
}

/// A diagnostic reported by the database server.
///
/// The legacy numeric code is computed when the error is raised, because it depends on
/// the compatibility mode of the statement that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    pub(crate) sqlstate: String,
    pub(crate) message: String,
    pub(crate) sqlcode: i64,
    pub(crate) line: i32,
}

impl DatabaseError {
    pub(crate) fn new(line: i32, sqlstate: &str, message: &str, compat: CompatMode) -> Self {
        let sqlcode = match sqlstate {
            sqlstate::UNIQUE_VIOLATION if compat.is_informix() => code::INFORMIX_DUPLICATE_KEY,
            sqlstate::UNIQUE_VIOLATION => code::DUPLICATE_KEY,
            sqlstate::CARDINALITY_VIOLATION if compat.is_informix() => {
                code::INFORMIX_SUBSELECT_NOT_ONE
            }
            sqlstate::CARDINALITY_VIOLATION => code::SUBSELECT_NOT_ONE,
            _ => code::PGSQL,
        };

        Self {
            sqlstate: sqlstate.chars().take(5).collect(),
            message: message.trim_end().to_owned(),
            sqlcode,
            line,
        }
    }

    /// Pulls the diagnostic out of a failed result, or out of the connection when there is
    /// no result at all.
    pub(crate) fn from_backend(
        line: i32,
        compat: CompatMode,
        result: Option<&QueryResult>,
        backend: &dyn BackendConnection,
    ) -> Self {
        let (state, message) = match result.and_then(QueryResult::error_fields) {
            Some(fields) => (fields.sqlstate.clone(), fields.message.clone()),
            None => (
                sqlstate::ECPG_INTERNAL_ERROR.to_owned(),
                backend.error_message(),
            ),
        };

        if state == sqlstate::ECPG_INTERNAL_ERROR && backend.status() == ConnectionStatus::Bad {
            return Self::new(
                line,
                sqlstate::CRASH_SHUTDOWN,
                "the connection to the server was lost",
                compat,
            );
        }

        Self::new(line, &state, &message, compat)
    }

    /// The SQLSTATE reported by the server.
    pub fn sqlstate(&self) -> &str {
        &self.sqlstate
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sqlcode(&self) -> i64 {
        self.sqlcode
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} on line {}", self.message, self.line)
    }
}

/// Represents all the ways a runtime call can fail.
///
/// The `Display` output of every variant is the message stored in the diagnostic area.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A SELECT returned no rows, or a data-modifying command touched none.
    #[error("no data found on line {line}")]
    NotFound { line: i32 },

    #[error("out of memory on line {line}")]
    OutOfMemory { line: i32 },

    /// A host variable or descriptor item has a type this operation cannot handle.
    #[error("unsupported type \"{ty}\" on line {line}")]
    Unsupported { line: i32, ty: String },

    #[error("too many arguments on line {line}")]
    TooManyArguments { line: i32 },

    #[error("too few arguments on line {line}")]
    TooFewArguments { line: i32 },

    /// The result has more rows than the target array can hold.
    #[error("too many matches on line {line}")]
    TooManyMatches { line: i32 },

    #[error("invalid input syntax for type int: \"{value}\", on line {line}")]
    IntFormat { line: i32, value: String },

    #[error("invalid input syntax for type unsigned int: \"{value}\", on line {line}")]
    UintFormat { line: i32, value: String },

    #[error("invalid input syntax for floating-point type: \"{value}\", on line {line}")]
    FloatFormat { line: i32, value: String },

    #[error("invalid input syntax for type numeric: \"{value}\", on line {line}")]
    NumericFormat { line: i32, value: String },

    #[error("invalid input syntax for type interval: \"{value}\", on line {line}")]
    IntervalFormat { line: i32, value: String },

    #[error("invalid input syntax for type date: \"{value}\", on line {line}")]
    DateFormat { line: i32, value: String },

    #[error("invalid input syntax for type timestamp: \"{value}\", on line {line}")]
    TimestampFormat { line: i32, value: String },

    /// `None` means the host cell had a width that cannot hold a boolean.
    #[error("{}", convert_bool_message(.line, .value))]
    ConvertBool { line: i32, value: Option<String> },

    #[error("empty query on line {line}")]
    Empty { line: i32 },

    #[error("null value without indicator on line {line}")]
    MissingIndicator { line: i32 },

    #[error("variable does not have an array type on line {line}")]
    NoArray { line: i32 },

    #[error("data read from server is not an array on line {line}")]
    DataNotArray { line: i32 },

    #[error("connection \"{name}\" does not exist on line {line}")]
    NoConnection { line: i32, name: String },

    #[error("not connected to connection \"{name}\" on line {line}")]
    NotConnected { line: i32, name: String },

    #[error("connection \"{name}\" already exists on line {line}")]
    DuplicateConnection { line: i32, name: String },

    #[error("invalid statement name \"{name}\" on line {line}")]
    InvalidStatement { line: i32, name: String },

    #[error("descriptor \"{name}\" not found on line {line}")]
    UnknownDescriptor { line: i32, name: String },

    #[error("descriptor index out of range on line {line}")]
    InvalidDescriptorIndex { line: i32 },

    #[error("unrecognized descriptor item \"{item}\" on line {line}")]
    UnknownDescriptorItem { line: i32, item: String },

    #[error("variable does not have a numeric type on line {line}")]
    VarNotNumeric { line: i32 },

    #[error("variable does not have a character type on line {line}")]
    VarNotChar { line: i32 },

    #[error("error in transaction processing on line {line}")]
    Transaction { line: i32 },

    #[error("could not connect to database \"{database}\" on line {line}")]
    Connect { line: i32, database: String },

    #[error("cursor \"{name}\" does not exist on line {line}")]
    UnknownCursor { line: i32, name: String },

    /// A caller-supplied host buffer is shorter than its declared geometry.
    #[error("host variable buffer too small ({len} bytes, {needed} needed) on line {line}")]
    HostBuffer {
        line: i32,
        needed: usize,
        len: usize,
    },

    /// Error returned from the database server.
    #[error("{0}")]
    Database(Box<DatabaseError>),
}

fn convert_bool_message(line: &i32, value: &Option<String>) -> String {
    match value {
        Some(value) => format!("invalid syntax for type boolean: \"{value}\", on line {line}"),
        None => format!("could not convert boolean value: size mismatch, on line {line}"),
    }
}

impl Error {
    /// The legacy numeric code for this error.
    pub fn sqlcode(&self) -> i64 {
        match self {
            Error::NotFound { .. } => code::NOT_FOUND,
            Error::OutOfMemory { .. } => code::OUT_OF_MEMORY,
            Error::Unsupported { .. } | Error::HostBuffer { .. } => code::UNSUPPORTED,
            Error::TooManyArguments { .. } => code::TOO_MANY_ARGUMENTS,
            Error::TooFewArguments { .. } => code::TOO_FEW_ARGUMENTS,
            Error::TooManyMatches { .. } => code::TOO_MANY_MATCHES,
            Error::IntFormat { .. } => code::INT_FORMAT,
            Error::UintFormat { .. } => code::UINT_FORMAT,
            Error::FloatFormat { .. } => code::FLOAT_FORMAT,
            Error::NumericFormat { .. } => code::NUMERIC_FORMAT,
            Error::IntervalFormat { .. } => code::INTERVAL_FORMAT,
            Error::DateFormat { .. } => code::DATE_FORMAT,
            Error::TimestampFormat { .. } => code::TIMESTAMP_FORMAT,
            Error::ConvertBool { .. } => code::CONVERT_BOOL,
            Error::Empty { .. } => code::EMPTY,
            Error::MissingIndicator { .. } => code::MISSING_INDICATOR,
            Error::NoArray { .. } => code::NO_ARRAY,
            Error::DataNotArray { .. } => code::DATA_NOT_ARRAY,
            Error::NoConnection { .. } => code::NO_CONN,
            Error::NotConnected { .. } => code::NOT_CONN,
            Error::DuplicateConnection { .. } => code::CONNECT,
            Error::InvalidStatement { .. } => code::INVALID_STMT,
            Error::UnknownDescriptor { .. } => code::UNKNOWN_DESCRIPTOR,
            Error::InvalidDescriptorIndex { .. } => code::INVALID_DESCRIPTOR_INDEX,
            Error::UnknownDescriptorItem { .. } => code::UNKNOWN_DESCRIPTOR_ITEM,
            Error::VarNotNumeric { .. } => code::VAR_NOT_NUMERIC,
            Error::VarNotChar { .. } => code::VAR_NOT_CHAR,
            Error::Transaction { .. } => code::TRANS,
            Error::Connect { .. } => code::CONNECT,
            Error::UnknownCursor { .. } => code::WARNING_UNKNOWN_PORTAL,
            Error::Database(err) => err.sqlcode,
        }
    }

    /// The SQLSTATE for this error.
    pub fn sqlstate(&self) -> &str {
        match self {
            Error::NotFound { .. } => sqlstate::NO_DATA,
            Error::OutOfMemory { .. } => sqlstate::ECPG_OUT_OF_MEMORY,
            Error::Unsupported { .. }
            | Error::HostBuffer { .. }
            | Error::Empty { .. }
            | Error::Transaction { .. } => sqlstate::ECPG_INTERNAL_ERROR,
            Error::TooManyArguments { .. } => sqlstate::USING_CLAUSE_DOES_NOT_MATCH_PARAMETERS,
            Error::TooFewArguments { .. } => sqlstate::USING_CLAUSE_DOES_NOT_MATCH_PARAMETERS,
            Error::TooManyMatches { .. } => sqlstate::CARDINALITY_VIOLATION,
            Error::IntFormat { .. }
            | Error::UintFormat { .. }
            | Error::FloatFormat { .. }
            | Error::NumericFormat { .. }
            | Error::IntervalFormat { .. }
            | Error::DateFormat { .. }
            | Error::TimestampFormat { .. }
            | Error::ConvertBool { .. }
            | Error::NoArray { .. }
            | Error::DataNotArray { .. } => sqlstate::DATATYPE_MISMATCH,
            Error::MissingIndicator { .. } => sqlstate::NULL_VALUE_NO_INDICATOR_PARAMETER,
            Error::NoConnection { .. } | Error::NotConnected { .. } => {
                sqlstate::CONNECTION_DOES_NOT_EXIST
            }
            Error::DuplicateConnection { .. } => sqlstate::CONNECTION_NAME_IN_USE,
            Error::InvalidStatement { .. } => sqlstate::INVALID_SQL_STATEMENT_NAME,
            Error::UnknownDescriptor { .. } => sqlstate::INVALID_SQL_DESCRIPTOR_NAME,
            Error::InvalidDescriptorIndex { .. } => sqlstate::INVALID_DESCRIPTOR_INDEX,
            Error::UnknownDescriptorItem { .. } => sqlstate::ECPG_INTERNAL_ERROR,
            Error::VarNotNumeric { .. } | Error::VarNotChar { .. } => {
                sqlstate::RESTRICTED_DATA_TYPE_ATTRIBUTE_VIOLATION
            }
            Error::Connect { .. } => sqlstate::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION,
            Error::UnknownCursor { .. } => sqlstate::INVALID_CURSOR_NAME,
            Error::Database(err) => &err.sqlstate,
        }
    }

    /// Returns the server diagnostic if this error came from the database.
    pub fn as_database_error(&self) -> Option<&DatabaseError> {
        match self {
            Error::Database(err) => Some(err),
            _ => None,
        }
    }

    /// `true` for the informational "no data" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_formats_messages_with_line_numbers() {
        let err = Error::IntFormat {
            line: 12,
            value: "abc".into(),
        };

        assert_eq!(
            err.to_string(),
            "invalid input syntax for type int: \"abc\", on line 12"
        );
        assert_eq!(err.sqlcode(), -204);
        assert_eq!(err.sqlstate(), "42804");
    }

    #[test]
    fn it_distinguishes_bool_size_mismatch() {
        let err = Error::ConvertBool {
            line: 3,
            value: None,
        };

        assert_eq!(
            err.to_string(),
            "could not convert boolean value: size mismatch, on line 3"
        );
    }

    #[test]
    fn it_maps_backend_sqlstates_to_legacy_codes() {
        let dup = DatabaseError::new(1, "23505", "duplicate key", CompatMode::Pgsql);
        assert_eq!(dup.sqlcode(), code::DUPLICATE_KEY);

        let dup = DatabaseError::new(1, "23505", "duplicate key", CompatMode::Informix);
        assert_eq!(dup.sqlcode(), code::INFORMIX_DUPLICATE_KEY);

        let card = DatabaseError::new(1, "21000", "more than one row", CompatMode::InformixSe);
        assert_eq!(card.sqlcode(), code::INFORMIX_SUBSELECT_NOT_ONE);

        let other = DatabaseError::new(7, "42P01", "relation \"t\" does not exist\n", CompatMode::Pgsql);
        assert_eq!(other.sqlcode(), code::PGSQL);
        assert_eq!(
            Error::from(other).to_string(),
            "relation \"t\" does not exist on line 7"
        );
    }
}
