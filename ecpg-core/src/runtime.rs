//! The runtime context every embedded SQL operation runs against.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};

use parking_lot::Mutex;

use crate::backend::BackendConnector;
use crate::connection::ConnectionRegistry;
use crate::descriptor::DescriptorRegistry;
use crate::error::{Error, Result};
use crate::memory;
use crate::options::RuntimeOptions;
use crate::prepare::StatementCache;
use crate::sqlca;
use crate::sqlda::Sqlda;
use crate::types::CompatMode;
use crate::variable::{HostArg, Storage, VariableList};

/// Shared state of an embedded SQL program: its connections, descriptors and the
/// auto-prepare cache.
///
/// A runtime is shared by reference between threads. Each thread has its own current
/// connection and diagnostic area ([`sqlca`](crate::sqlca)).
pub struct Runtime {
    pub(crate) connector: Box<dyn BackendConnector>,
    options: RuntimeOptions,
    pub(crate) connections: ConnectionRegistry,
    pub(crate) descriptors: DescriptorRegistry,
    pub(crate) stmt_cache: Mutex<StatementCache>,
    vars: Mutex<BTreeMap<i32, Vec<u8>>>,
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.options)
            .field("connections", &self.connections.names())
            .finish()
    }
}

/// Runs the body of a public operation.
///
/// The diagnostic area and the list of auto-allocated buffers start out clean; a failure is
/// recorded in the diagnostic area and releases the buffers the call allocated.
pub(crate) fn entry<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    sqlca::reset();
    memory::clear_auto_mem();

    let result = f();

    if let Err(err) = &result {
        sqlca::raise(err);
        memory::free_auto_mem();
    }

    result
}

impl Runtime {
    /// A runtime configured from the environment (see [`RuntimeOptions::from_env`]).
    pub fn new(connector: impl BackendConnector + 'static) -> Self {
        Self::with_options(connector, RuntimeOptions::from_env())
    }

    pub fn with_options(connector: impl BackendConnector + 'static, options: RuntimeOptions) -> Self {
        Self {
            connector: Box::new(connector),
            stmt_cache: Mutex::new(StatementCache::new(&options)),
            options,
            connections: ConnectionRegistry::new(),
            descriptors: DescriptorRegistry::default(),
            vars: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Binds `bytes` to the free-standing variable `number`, replacing an earlier binding.
    pub fn set_var(&self, number: i32, bytes: impl Into<Vec<u8>>) {
        self.vars.lock().insert(number, bytes.into());
    }

    pub fn get_var(&self, number: i32) -> Option<Vec<u8>> {
        self.vars.lock().get(&number).cloned()
    }

    pub(crate) fn clear_vars(&self) {
        self.vars.lock().clear();
    }

    /// Describes the columns the prepared statement `statement` returns, into a descriptor
    /// ([`HostArg::descriptor`]) or a SQLDA list ([`HostArg::sqlda`]).
    ///
    /// Describing the input parameters is not supported.
    pub fn describe(
        &self,
        line: i32,
        compat: CompatMode,
        input: bool,
        connection: Option<&str>,
        statement: &str,
        target: HostArg<'_>,
    ) -> Result<()> {
        entry(|| {
            if input {
                return Err(Error::Unsupported {
                    line,
                    ty: "DESCRIBE INPUT".to_owned(),
                });
            }

            let conn = self.connection(line, connection)?;
            let result = {
                let mut conn = conn.lock();
                if conn.find_prepared(statement).is_none() {
                    return Err(Error::InvalidStatement {
                        line,
                        name: statement.to_owned(),
                    });
                }

                let result = log_statement!(
                    line,
                    conn.name,
                    statement,
                    conn.backend.describe_prepared(statement)
                );
                conn.check(line, compat, result)?
            };

            let mut list = VariableList::build(line, statement, [target.into()])?;
            for var in &mut list.inputs {
                match &mut var.storage {
                    Storage::Descriptor(name) => {
                        self.descriptors.set_result(line, name, result.clone())?;
                    }
                    Storage::Sqlda(list) => {
                        list.clear();
                        list.push(Sqlda::build(line, &result, None, compat)?);
                    }
                    _ => {
                        return Err(Error::Unsupported {
                            line,
                            ty: var.ty.name().to_owned(),
                        })
                    }
                }
            }

            Ok(())
        })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for conn in self.connections.all() {
            let mut conn = conn.lock();
            tracing::debug!(connection = %conn.name, "closing connection left open");
            conn.backend.close();
        }
    }
}
