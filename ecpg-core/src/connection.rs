//! Named connections and the current-connection lookup.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{BackendConnection, ConnectionStatus, QueryResult, ResultStatus, TransactionStatus};
use crate::error::{DatabaseError, Error, Result};
use crate::options::ConnectOptions;
use crate::prepare::PreparedStatement;
use crate::runtime::{entry, Runtime};
use crate::sqlca;
use crate::typecache::TypeCache;
use crate::types::CompatMode;

/// An open session together with everything the runtime tracks for it.
pub(crate) struct Connection {
    pub(crate) name: String,
    pub(crate) backend: Box<dyn BackendConnection>,
    pub(crate) autocommit: bool,
    pub(crate) types: TypeCache,
    pub(crate) prepared: Vec<PreparedStatement>,
    pub(crate) cursors: Vec<String>,
}

pub(crate) type ConnectionRef = Arc<Mutex<Connection>>;

impl Connection {
    /// Runs `sql` and fails unless the server accepted it.
    ///
    /// COPY results are passed through; ending the copy is up to the caller.
    pub(crate) fn exec(&mut self, line: i32, compat: CompatMode, sql: &str) -> Result<QueryResult> {
        let result = log_statement!(line, self.name, sql, self.backend.exec(sql));
        self.check(line, compat, result)
    }

    pub(crate) fn check(
        &self,
        line: i32,
        compat: CompatMode,
        result: Option<QueryResult>,
    ) -> Result<QueryResult> {
        match result {
            Some(result) => match result.status() {
                ResultStatus::TuplesOk
                | ResultStatus::CommandOk
                | ResultStatus::CopyIn
                | ResultStatus::CopyOut => Ok(result),
                ResultStatus::EmptyQuery => Err(Error::Empty { line }),
                ResultStatus::BadResponse
                | ResultStatus::NonfatalError
                | ResultStatus::FatalError => {
                    Err(DatabaseError::from_backend(line, compat, Some(&result), &*self.backend).into())
                }
            },
            None => Err(DatabaseError::from_backend(line, compat, None, &*self.backend).into()),
        }
    }

    fn is_idle(&self) -> bool {
        self.backend.transaction_status() == TransactionStatus::Idle
    }

    /// Opens a transaction unless one is open or the session commits on its own.
    pub(crate) fn begin_if_needed(&mut self, line: i32, compat: CompatMode) -> Result<()> {
        if !self.autocommit && self.is_idle() {
            self.exec(line, compat, "begin transaction")?;
        }

        Ok(())
    }

    pub(crate) fn find_prepared(&self, name: &str) -> Option<&PreparedStatement> {
        self.prepared.iter().find(|stmt| stmt.name == name)
    }

    /// Drains pending notifications; they are logged and otherwise dropped.
    pub(crate) fn drain_notifications(&mut self, line: i32) {
        while let Some(notify) = self.backend.notifies() {
            log::debug!(
                target: "ecpg",
                "on line {}: asynchronous notification of \"{}\" from backend with pid {} received",
                line,
                notify.channel,
                notify.process_id
            );
        }
    }
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // keyed by registry so that runtimes do not see each other's current connection
    static THREAD_CURRENT: RefCell<HashMap<u64, Weak<Mutex<Connection>>>> =
        RefCell::new(HashMap::new());
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        // the thread-local map may already be gone during thread teardown
        let _ = THREAD_CURRENT.try_with(|map| map.borrow_mut().remove(&self.id));
    }
}

/// The open connections of one runtime, oldest first.
pub(crate) struct ConnectionRegistry {
    id: u64,
    connections: Mutex<Vec<(String, ConnectionRef)>>,
    current: Mutex<Weak<Mutex<Connection>>>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            connections: Mutex::new(Vec::new()),
            current: Mutex::new(Weak::new()),
        }
    }

    fn thread_current(&self) -> Option<ConnectionRef> {
        THREAD_CURRENT.with(|map| map.borrow().get(&self.id).and_then(Weak::upgrade))
    }

    fn set_thread_current(&self, conn: Option<&ConnectionRef>) {
        THREAD_CURRENT.with(|map| {
            let mut map = map.borrow_mut();
            match conn {
                Some(conn) => {
                    // entries of runtimes dropped on other threads
                    map.retain(|_, weak| weak.strong_count() > 0);
                    map.insert(self.id, Arc::downgrade(conn))
                }
                None => map.remove(&self.id),
            }
        });
    }

    /// The connection of this thread, falling back to the one opened last.
    pub(crate) fn current(&self) -> Option<ConnectionRef> {
        self.thread_current()
            .or_else(|| self.current.lock().upgrade())
    }

    /// Resolves a connection name; no name and `CURRENT` both mean the current connection.
    pub(crate) fn get(&self, name: Option<&str>) -> Option<ConnectionRef> {
        match name {
            None => self.current(),
            Some(name) if name.eq_ignore_ascii_case("CURRENT") => self.current(),
            Some(name) => self.find(name),
        }
    }

    fn find(&self, name: &str) -> Option<ConnectionRef> {
        self.connections
            .lock()
            .iter()
            .find(|(other, _)| other == name)
            .map(|(_, conn)| Arc::clone(conn))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Links a new connection and makes it current, for this thread and as the fallback.
    ///
    /// Hands the connection back when its name is taken.
    pub(crate) fn insert(&self, conn: Connection) -> std::result::Result<ConnectionRef, Connection> {
        let mut connections = self.connections.lock();

        if connections.iter().any(|(name, _)| *name == conn.name) {
            return Err(conn);
        }

        let name = conn.name.clone();
        let conn = Arc::new(Mutex::new(conn));
        connections.push((name, Arc::clone(&conn)));
        drop(connections);

        *self.current.lock() = Arc::downgrade(&conn);
        self.set_thread_current(Some(&conn));

        Ok(conn)
    }

    pub(crate) fn set_current(&self, conn: &ConnectionRef) {
        self.set_thread_current(Some(conn));
    }

    /// Unlinks `conn`; current pointers that referred to it move to the oldest remaining
    /// connection. Returns `true` when no connection is left.
    pub(crate) fn remove(&self, conn: &ConnectionRef) -> bool {
        let mut connections = self.connections.lock();
        connections.retain(|(_, other)| !Arc::ptr_eq(other, conn));

        let next = connections.first().map(|(_, next)| Arc::clone(next));
        let empty = connections.is_empty();
        drop(connections);

        let mut current = self.current.lock();
        if current.upgrade().map_or(true, |c| Arc::ptr_eq(&c, conn)) {
            *current = next.as_ref().map_or_else(Weak::new, Arc::downgrade);
        }
        drop(current);

        if self.thread_current().map_or(true, |c| Arc::ptr_eq(&c, conn)) {
            self.set_thread_current(next.as_ref());
        }

        empty
    }

    pub(crate) fn all(&self) -> Vec<ConnectionRef> {
        self.connections
            .lock()
            .iter()
            .map(|(_, conn)| Arc::clone(conn))
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.connections
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn no_connection(line: i32, name: Option<&str>) -> Error {
    Error::NoConnection {
        line,
        name: name.unwrap_or("NULL").to_owned(),
    }
}

fn is_transaction_start(action: &str) -> bool {
    let action = action.trim_start().to_ascii_lowercase();

    ["begin", "start", "commit prepared", "rollback prepared"]
        .iter()
        .any(|prefix| action.starts_with(prefix))
}

impl Runtime {
    pub(crate) fn connection(&self, line: i32, name: Option<&str>) -> Result<ConnectionRef> {
        self.connections
            .get(name)
            .ok_or_else(|| no_connection(line, name))
    }

    /// Opens a connection to `target` (see [`ConnectOptions`] for the accepted forms).
    ///
    /// Without a target the backend defaults apply and the connection is named `DEFAULT`
    /// unless `name` says otherwise.
    pub fn connect(
        &self,
        line: i32,
        compat: CompatMode,
        target: Option<&str>,
        name: Option<&str>,
    ) -> Result<()> {
        entry(|| {
            let options = match target {
                Some(target) => ConnectOptions::parse_target(line, target)?,
                None => ConnectOptions::new(),
            };

            self.open(line, compat, name, options)
        })
    }

    /// Opens a connection from already parsed options.
    pub fn connect_with(
        &self,
        line: i32,
        compat: CompatMode,
        name: Option<&str>,
        options: ConnectOptions,
    ) -> Result<()> {
        entry(|| self.open(line, compat, name, options))
    }

    fn open(
        &self,
        line: i32,
        compat: CompatMode,
        name: Option<&str>,
        options: ConnectOptions,
    ) -> Result<()> {
        let name = name
            .or(options.get_database())
            .unwrap_or("DEFAULT")
            .to_owned();

        if self.connections.contains(&name) {
            return Err(Error::DuplicateConnection { line, name });
        }

        tracing::debug!(
            connection = %name,
            database = options.get_database().unwrap_or("<DEFAULT>"),
            host = options.get_host().unwrap_or("<DEFAULT>"),
            port = options.get_port().unwrap_or("<DEFAULT>"),
            ?compat,
            "opening connection"
        );

        let mut backend = match self.connector.connect(&options.to_params()) {
            Ok(backend) => backend,
            Err(message) => {
                tracing::warn!(connection = %name, %message, "could not open connection");
                return Err(Error::Connect {
                    line,
                    database: options
                        .get_database()
                        .unwrap_or("<DEFAULT>")
                        .to_owned(),
                });
            }
        };

        backend.set_notice_receiver(Box::new(|notice| {
            sqlca::notice(&notice.sqlstate, &notice.message)
        }));

        let conn = Connection {
            name,
            backend,
            autocommit: options.autocommit,
            types: TypeCache::new(),
            prepared: Vec::new(),
            cursors: Vec::new(),
        };

        match self.connections.insert(conn) {
            Ok(_) => Ok(()),
            Err(mut conn) => {
                // another thread took the name meanwhile
                conn.backend.close();
                Err(Error::DuplicateConnection {
                    line,
                    name: conn.name,
                })
            }
        }
    }

    /// Makes `name` the current connection of the calling thread.
    pub fn set_connection(&self, line: i32, name: &str) -> Result<()> {
        entry(|| {
            let conn = self.connection(line, Some(name))?;
            self.connections.set_current(&conn);
            Ok(())
        })
    }

    /// Closes one connection, the current one when `name` is `None`, or every connection
    /// when `name` is `ALL`.
    ///
    /// Closing all connections carries on past failures and reports the first.
    pub fn disconnect(&self, line: i32, name: Option<&str>) -> Result<()> {
        entry(|| {
            if name.map_or(false, |name| name.eq_ignore_ascii_case("ALL")) {
                let mut first_err = None;

                for conn in self.connections.all() {
                    if let Err(err) = self.finish(line, &conn) {
                        first_err.get_or_insert(err);
                    }
                }

                return first_err.map_or(Ok(()), Err);
            }

            let conn = self.connection(line, name)?;
            self.finish(line, &conn)
        })
    }

    /// Tears a connection down: its prepared statements, the session, then the registry entry.
    fn finish(&self, line: i32, conn: &ConnectionRef) -> Result<()> {
        let mut guard = conn.lock();
        let name = guard.name.clone();

        let deallocated = guard.deallocate_all(line, CompatMode::Pgsql);
        if let Err(err) = &deallocated {
            tracing::warn!(connection = %name, error = %err, "could not release prepared statements");
        }

        guard.backend.close();
        drop(guard);

        if self.connections.remove(conn) {
            self.clear_vars();
        }

        tracing::debug!(connection = %name, "connection closed");
        deallocated
    }

    /// Checks that the connection exists and its session is alive.
    pub fn status(&self, line: i32, name: Option<&str>) -> Result<()> {
        entry(|| {
            let conn = self.connection(line, name)?;
            let conn = conn.lock();

            if conn.backend.status() == ConnectionStatus::Bad {
                return Err(Error::NotConnected {
                    line,
                    name: conn.name.clone(),
                });
            }

            Ok(())
        })
    }

    /// Runs a transaction command such as `commit` or `rollback`.
    ///
    /// Outside autocommit a transaction is opened first when none is, except for commands
    /// that open one themselves or act on a prepared transaction.
    pub fn transaction(&self, line: i32, name: Option<&str>, action: &str) -> Result<()> {
        entry(|| {
            let conn = self.connection(line, name)?;
            let mut conn = conn.lock();

            log::debug!(
                target: "ecpg",
                "on line {}: action \"{}\"; connection \"{}\"",
                line,
                action,
                conn.name
            );

            if !is_transaction_start(action) {
                conn.begin_if_needed(line, CompatMode::Pgsql)?;
            }

            conn.exec(line, CompatMode::Pgsql, action)?;
            Ok(())
        })
    }

    /// Switches autocommit; leaving it opens a transaction, entering it commits the open one.
    pub fn set_autocommit(&self, line: i32, name: Option<&str>, on: bool) -> Result<()> {
        entry(|| {
            let conn = self.connection(line, name)?;
            let mut conn = conn.lock();

            log::debug!(
                target: "ecpg",
                "on line {}: autocommit {}; connection \"{}\"",
                line,
                if on { "on" } else { "off" },
                conn.name
            );

            if conn.autocommit && !on {
                if conn.is_idle() {
                    conn.exec(line, CompatMode::Pgsql, "begin transaction")?;
                }
                conn.autocommit = false;
            } else if !conn.autocommit && on {
                if !conn.is_idle() {
                    conn.exec(line, CompatMode::Pgsql, "commit")?;
                }
                conn.autocommit = true;
            }

            Ok(())
        })
    }

    /// Name of the calling thread's current connection.
    pub fn current_connection(&self) -> Option<String> {
        self.connections
            .current()
            .map(|conn| conn.lock().name.clone())
    }

    /// Names of all open connections, oldest first.
    pub fn connection_names(&self) -> Vec<String> {
        self.connections.names()
    }
}
