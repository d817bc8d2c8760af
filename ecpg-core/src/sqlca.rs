//! The per-thread diagnostic area (`sqlca`).
//!
//! Every entry point resets the area of the calling thread before doing any work. Failures
//! and warnings are recorded here in addition to being returned, so generated code that only
//! looks at `sqlca` keeps working.

use std::cell::RefCell;
use std::mem;

use crate::error::{code, sqlstate, Error};

/// Capacity of the message buffer, including the terminating NUL of the C layout.
pub const SQLERRMC_LEN: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlErrm {
    pub sqlerrml: i16,
    pub sqlerrmc: [u8; SQLERRMC_LEN],
}

/// SQL communication area of one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sqlca {
    pub sqlcaid: [u8; 8],
    pub sqlabc: i64,
    pub sqlcode: i64,
    pub sqlerrm: SqlErrm,
    pub sqlerrp: [u8; 8],

    /// `[1]` holds the OID of an inserted row, `[2]` the number of rows processed.
    pub sqlerrd: [i64; 6],

    /// `[0]` is set when any other flag is set, `[1]` on string truncation, `[2]` on a
    /// server notice.
    pub sqlwarn: [u8; 8],
    pub sqlstate: [u8; 5],
}

impl Default for Sqlca {
    fn default() -> Self {
        Self::new()
    }
}

impl Sqlca {
    pub fn new() -> Self {
        Sqlca {
            sqlcaid: *b"SQLCA   ",
            sqlabc: mem::size_of::<Sqlca>() as i64,
            sqlcode: 0,
            sqlerrm: SqlErrm {
                sqlerrml: 0,
                sqlerrmc: [0; SQLERRMC_LEN],
            },
            sqlerrp: *b"NOT SET ",
            sqlerrd: [0; 6],
            sqlwarn: [0; 8],
            sqlstate: *b"00000",
        }
    }

    pub fn reset(&mut self) {
        *self = Sqlca::new();
    }

    /// The stored message, without the unused tail of the buffer.
    pub fn message(&self) -> &str {
        let len = (self.sqlerrm.sqlerrml.max(0) as usize).min(SQLERRMC_LEN);

        std::str::from_utf8(&self.sqlerrm.sqlerrmc[..len]).unwrap_or_default()
    }

    pub fn sqlstate(&self) -> &str {
        std::str::from_utf8(&self.sqlstate).unwrap_or(sqlstate::ECPG_INTERNAL_ERROR)
    }

    /// Number of rows processed by the last statement.
    pub fn rows(&self) -> i64 {
        self.sqlerrd[2]
    }

    pub fn is_truncated(&self) -> bool {
        self.sqlwarn[1] == b'W'
    }

    pub(crate) fn set_message(&mut self, message: &str) {
        // leave room for the terminator and never split a character
        let mut len = message.len().min(SQLERRMC_LEN - 1);
        while !message.is_char_boundary(len) {
            len -= 1;
        }

        self.sqlerrm.sqlerrmc = [0; SQLERRMC_LEN];
        self.sqlerrm.sqlerrmc[..len].copy_from_slice(&message.as_bytes()[..len]);
        self.sqlerrm.sqlerrml = len as i16;
    }

    pub(crate) fn set_sqlstate(&mut self, state: &str) {
        let mut buf = *b"     ";
        let len = state.len().min(5);
        buf[..len].copy_from_slice(&state.as_bytes()[..len]);
        self.sqlstate = buf;
    }

    pub(crate) fn set_error(&mut self, err: &Error) {
        self.sqlcode = err.sqlcode();
        self.set_sqlstate(err.sqlstate());
        self.set_message(&err.to_string());
    }
}

thread_local! {
    static SQLCA: RefCell<Sqlca> = RefCell::new(Sqlca::new());
}

/// Runs `f` with the calling thread's diagnostic area.
pub fn with<R>(f: impl FnOnce(&Sqlca) -> R) -> R {
    SQLCA.with(|ca| f(&ca.borrow()))
}

pub(crate) fn with_mut<R>(f: impl FnOnce(&mut Sqlca) -> R) -> R {
    SQLCA.with(|ca| f(&mut ca.borrow_mut()))
}

/// A copy of the calling thread's diagnostic area.
pub fn get() -> Sqlca {
    with(Sqlca::clone)
}

pub(crate) fn reset() {
    with_mut(Sqlca::reset);
}

/// Records `err` as the outcome of the current call.
pub(crate) fn raise(err: &Error) {
    log::debug!(
        target: "ecpg",
        "raising sqlcode {} (sqlstate {}): {}",
        err.sqlcode(),
        err.sqlstate(),
        err
    );

    with_mut(|ca| ca.set_error(err));
}

/// Flags a string truncation during output decode.
pub(crate) fn warn_truncated() {
    with_mut(|ca| {
        ca.sqlwarn[0] = b'W';
        ca.sqlwarn[1] = b'W';
    });
}

/// Records a server notice as a warning.
///
/// Notices of class `00` are not warnings and are dropped.
pub(crate) fn notice(state: &str, message: &str) {
    if state.starts_with("00") {
        return;
    }

    log::debug!(target: "ecpg", "notice: {}", message.trim_end());

    let sqlcode = match state {
        sqlstate::INVALID_CURSOR_NAME => code::WARNING_UNKNOWN_PORTAL,
        sqlstate::ACTIVE_SQL_TRANSACTION => code::WARNING_IN_TRANSACTION,
        sqlstate::NO_ACTIVE_SQL_TRANSACTION => code::WARNING_NO_TRANSACTION,
        sqlstate::DUPLICATE_CURSOR => code::WARNING_PORTAL_EXISTS,
        _ => code::NO_ERROR,
    };

    with_mut(|ca| {
        ca.set_sqlstate(state);
        ca.sqlcode = sqlcode;
        ca.sqlwarn[0] = b'W';
        ca.sqlwarn[2] = b'W';
        ca.set_message(message.trim_end());
    });
}

pub(crate) fn set_rows(rows: i64) {
    with_mut(|ca| ca.sqlerrd[2] = rows);
}

pub(crate) fn set_oid(oid: i64) {
    with_mut(|ca| ca.sqlerrd[1] = oid);
}

/// Prints the last error message to stderr.
pub fn sqlprint() {
    with(|ca| eprintln!("sql error {}", ca.message()));
}
