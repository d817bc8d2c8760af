//! Core of `ecpg`, the runtime library embedded SQL programs link against.
//!
//! Everything runs against a [`Runtime`]: it owns the named connections, the SQL
//! descriptors and the auto-prepare cache. Each public operation records its outcome in the
//! calling thread's diagnostic area ([`sqlca`]) as well as returning it.

#[macro_use]
mod logging;

pub mod backend;
pub mod codec;
pub mod error;
pub mod sqlca;
pub mod types;

mod connection;
mod cursor;
mod descriptor;
mod execute;
mod memory;
mod options;
mod prepare;
mod runtime;
mod sqlda;
mod strided;
mod typecache;
mod value;
mod variable;

#[cfg(feature = "mock")]
pub mod mock;

#[doc(inline)]
pub use self::{
    backend::{BackendConnection, BackendConnector, QueryResult},
    descriptor::DescItem,
    error::{DatabaseError, Error, Result},
    execute::{Statement, StatementKind},
    memory::{free_auto_mem, AutoBuffer},
    options::{ConnectOptions, ParseError, RuntimeOptions},
    runtime::Runtime,
    sqlca::{sqlprint, Sqlca},
    sqlda::{SqlVar, Sqlda, SqldaLayout, NULL_PTR},
    types::{CompatMode, HostType},
    variable::{Arg, HostArg, Storage},
};
