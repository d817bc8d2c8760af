//! Runtime support for embedded SQL programs.
//!
//! A [`Runtime`] owns the connections, prepared statements and descriptors of a program.
//! Statements run through [`Runtime::execute`] with their host variables passed as a list of
//! [`Arg`]s: the inputs, [`Arg::EndOfInput`], then the outputs.
//!
//! ```rust,ignore
//! let rt = Runtime::new(connector);
//! rt.connect(1, CompatMode::Pgsql, Some("sales@localhost:5432"), None)?;
//!
//! let mut total = [0u8; 8];
//! rt.execute(
//!     &Statement::new(2, "select sum(amount) from orders where region = ?"),
//!     [
//!         HostArg::string("north").into(),
//!         Arg::EndOfInput,
//!         HostArg::output(HostType::Double, &mut total).into(),
//!     ],
//! )?;
//! ```
//!
//! Failures are returned as [`Error`] and also recorded in the calling thread's diagnostic
//! area ([`sqlca`]). The `mock` feature adds an in-memory [`BackendConnector`] for tests.

// Modules
pub use ecpg_core::{backend, codec, error, sqlca, types};

#[cfg(feature = "mock")]
pub use ecpg_core::mock;

// Types
pub use ecpg_core::{
    Arg, AutoBuffer, CompatMode, ConnectOptions, DatabaseError, DescItem, Error, HostArg,
    HostType, ParseError, Result, Runtime, RuntimeOptions, SqlVar, Sqlca, Sqlda, SqldaLayout,
    Statement, StatementKind, Storage, NULL_PTR,
};

// Backend seam
pub use ecpg_core::{BackendConnection, BackendConnector, QueryResult};

// Functions
pub use ecpg_core::{free_auto_mem, sqlprint};
