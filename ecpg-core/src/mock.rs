//! An in-memory backend client for tests.
//!
//! [`MockBackend`] is a shared handle: the connections it opens record every call into it and
//! answer statements from a script of results queued with [`MockBackend::expect`]. A statement
//! without a scripted answer succeeds with a command tag derived from its first word.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    BackendConnection, BackendConnector, ConnectionStatus, Notice, NoticeReceiver, Notification,
    QueryResult, TransactionStatus,
};

/// One call a mock connection received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(Vec<(String, String)>),
    Exec(String),
    Prepare {
        name: String,
        sql: String,
        nparams: usize,
    },
    ExecPrepared {
        name: String,
        params: Vec<Option<String>>,
    },
    Describe(String),
    EndCopy,
    Close,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    script: VecDeque<(String, QueryResult)>,
    notifications: VecDeque<Notification>,
    receivers: Vec<NoticeReceiver>,
    transaction: Option<TransactionStatus>,
    broken: bool,
    refuse: Option<String>,
    escape: bool,
}

impl MockState {
    /// Takes the first scripted result whose pattern occurs in `key`.
    fn answer(&mut self, key: &str) -> Option<QueryResult> {
        let lower = key.to_ascii_lowercase();
        let at = self
            .script
            .iter()
            .position(|(pattern, _)| lower.contains(pattern.as_str()))?;

        self.script.remove(at).map(|(_, result)| result)
    }

    fn track_transaction(&mut self, sql: &str) {
        let word = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match word.as_str() {
            "begin" | "start" => self.transaction = Some(TransactionStatus::InTransaction),
            "commit" | "rollback" | "end" | "abort" => {
                self.transaction = Some(TransactionStatus::Idle)
            }
            _ => {}
        }
    }
}

fn default_result(sql: &str) -> QueryResult {
    let word = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    match word.as_str() {
        "" => QueryResult::with_status(crate::backend::ResultStatus::EmptyQuery),
        "INSERT" => QueryResult::command("INSERT 0 0"),
        "UPDATE" | "DELETE" => QueryResult::command(format!("{word} 0")),
        "SELECT" => QueryResult::empty(),
        _ => QueryResult::command(word),
    }
}

/// Shared handle to a scripted backend.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("calls", &self.state.lock().calls.len())
            .finish()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `result` as the answer to the next call whose text contains `pattern`.
    ///
    /// Matching ignores case. Prepared statements are matched as `prepare <name>`,
    /// `execute <name>` and `describe <name>`.
    pub fn expect(&self, pattern: &str, result: QueryResult) -> &Self {
        self.state
            .lock()
            .script
            .push_back((pattern.to_ascii_lowercase(), result));
        self
    }

    /// Queues `result` as the answer to the next call, whatever it is.
    pub fn push_result(&self, result: QueryResult) -> &Self {
        self.expect("", result)
    }

    /// Queues a notification for the next poll.
    pub fn notify(&self, channel: &str, payload: &str) {
        self.state.lock().notifications.push_back(Notification {
            channel: channel.to_owned(),
            process_id: 4242,
            payload: payload.to_owned(),
        });
    }

    /// Delivers a notice to every connection opened so far.
    pub fn notice(&self, sqlstate: &str, message: &str) {
        let notice = Notice {
            sqlstate: sqlstate.to_owned(),
            message: message.to_owned(),
        };

        for receiver in &self.state.lock().receivers {
            receiver(&notice);
        }
    }

    /// Makes every later call fail the way a dropped connection does.
    pub fn break_connection(&self) {
        self.state.lock().broken = true;
    }

    /// Makes every later connection attempt fail with `message`.
    pub fn refuse_connections(&self, message: &str) {
        self.state.lock().refuse = Some(message.to_owned());
    }

    /// Makes connections quote literals themselves, using dollar quoting.
    pub fn escape_literals(&self) {
        self.state.lock().escape = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Text of every statement run through [`BackendConnection::exec`].
    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Exec(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// A connection without going through [`BackendConnector::connect`].
    pub fn connection(&self) -> MockConnection {
        MockConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }
    }
}

impl BackendConnector for MockBackend {
    fn connect(&self, params: &[(String, String)]) -> Result<Box<dyn BackendConnection>, String> {
        let mut state = self.state.lock();
        state.calls.push(Call::Connect(params.to_vec()));

        if let Some(message) = &state.refuse {
            return Err(message.clone());
        }

        drop(state);
        Ok(Box::new(self.connection()))
    }
}

/// A connection opened by a [`MockBackend`].
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockConnection {
    fn run(&mut self, call: Call, key: &str, sql: &str) -> Option<QueryResult> {
        let mut state = self.state.lock();
        state.calls.push(call);

        if state.broken || self.closed {
            return None;
        }

        let result = state.answer(key).unwrap_or_else(|| default_result(sql));
        state.track_transaction(sql);

        Some(result)
    }
}

impl BackendConnection for MockConnection {
    fn exec(&mut self, sql: &str) -> Option<QueryResult> {
        self.run(Call::Exec(sql.to_owned()), sql, sql)
    }

    fn prepare(&mut self, name: &str, sql: &str, nparams: usize) -> Option<QueryResult> {
        let call = Call::Prepare {
            name: name.to_owned(),
            sql: sql.to_owned(),
            nparams,
        };

        self.run(call, &format!("prepare {name}"), "PREPARE")
    }

    fn exec_prepared(&mut self, name: &str, params: &[Option<String>]) -> Option<QueryResult> {
        let call = Call::ExecPrepared {
            name: name.to_owned(),
            params: params.to_vec(),
        };

        self.run(call, &format!("execute {name}"), "EXECUTE")
    }

    fn describe_prepared(&mut self, name: &str) -> Option<QueryResult> {
        self.run(
            Call::Describe(name.to_owned()),
            &format!("describe {name}"),
            "SELECT",
        )
    }

    fn transaction_status(&self) -> TransactionStatus {
        let state = self.state.lock();

        if state.broken {
            TransactionStatus::Unknown
        } else {
            state.transaction.unwrap_or(TransactionStatus::Idle)
        }
    }

    fn status(&self) -> ConnectionStatus {
        if self.state.lock().broken || self.closed {
            ConnectionStatus::Bad
        } else {
            ConnectionStatus::Ok
        }
    }

    fn error_message(&self) -> String {
        if self.state.lock().broken {
            "server closed the connection unexpectedly".to_owned()
        } else {
            String::new()
        }
    }

    fn escape_literal(&self, text: &str) -> Option<String> {
        self.state
            .lock()
            .escape
            .then(|| format!("$${text}$$"))
    }

    fn notifies(&mut self) -> Option<Notification> {
        self.state.lock().notifications.pop_front()
    }

    fn end_copy(&mut self) {
        self.state.lock().calls.push(Call::EndCopy);
    }

    fn set_notice_receiver(&mut self, receiver: NoticeReceiver) {
        self.state.lock().receivers.push(receiver);
    }

    fn close(&mut self) {
        self.closed = true;
        self.state.lock().calls.push(Call::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ResultStatus;

    #[test]
    fn it_replays_scripted_results_by_pattern() {
        let mock = MockBackend::new();
        mock.expect("from t", QueryResult::command("SELECT 0"))
            .expect("insert", QueryResult::command("INSERT 0 1"));

        let mut conn = mock.connection();

        let insert = conn.exec("INSERT INTO t VALUES (1)").unwrap();
        assert_eq!(insert.cmd_tuples(), 1);

        let begin = conn.exec("begin transaction").unwrap();
        assert_eq!(begin.command_tag(), "BEGIN");
        assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);

        let select = conn.exec("select a from t").unwrap();
        assert_eq!(select.command_tag(), "SELECT 0");

        assert_eq!(
            conn.exec("").map(|r| r.status()),
            Some(ResultStatus::EmptyQuery)
        );
    }

    #[test]
    fn broken_connections_return_nothing() {
        let mock = MockBackend::new();
        let mut conn = mock.connection();

        mock.break_connection();

        assert!(conn.exec("select 1").is_none());
        assert_eq!(conn.status(), ConnectionStatus::Bad);
        assert!(!conn.error_message().is_empty());
    }
}
