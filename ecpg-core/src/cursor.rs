//! Cursors: names bound to the connection they were opened on.

use crate::error::{Error, Result};
use crate::execute::Statement;
use crate::runtime::{entry, Runtime};
use crate::variable::Arg;

impl Runtime {
    /// Name of the connection a cursor was opened on.
    fn cursor_connection(&self, cursor: &str) -> Option<String> {
        self.connections.all().into_iter().find_map(|conn| {
            let conn = conn.lock();
            conn.cursors
                .iter()
                .any(|name| name == cursor)
                .then(|| conn.name.clone())
        })
    }

    /// Runs the `DECLARE ... CURSOR` or `OPEN` statement of `cursor` and remembers the
    /// connection it ran on.
    pub fn open_cursor<'a>(
        &self,
        stmt: &Statement<'_>,
        cursor: &str,
        args: impl IntoIterator<Item = Arg<'a>>,
    ) -> Result<()> {
        entry(|| {
            self.execute_in(stmt, args)?;

            let conn = self.connection(stmt.line, stmt.connection)?;
            let mut conn = conn.lock();
            if !conn.cursors.iter().any(|name| name == cursor) {
                conn.cursors.push(cursor.to_owned());
            }

            log::debug!(
                target: "ecpg",
                "on line {}: cursor {} opened on connection {}",
                stmt.line,
                cursor,
                conn.name
            );

            Ok(())
        })
    }

    /// Runs a `FETCH` or `MOVE` on the connection `cursor` belongs to.
    ///
    /// A cursor this runtime did not open runs on the statement's own connection.
    pub fn fetch_cursor<'a>(
        &self,
        stmt: &Statement<'_>,
        cursor: &str,
        args: impl IntoIterator<Item = Arg<'a>>,
    ) -> Result<()> {
        entry(|| {
            let owner = self.cursor_connection(cursor);
            let stmt = Statement {
                connection: owner.as_deref().or(stmt.connection),
                ..*stmt
            };

            self.execute_in(&stmt, args)
        })
    }

    /// Runs the `CLOSE` statement of `cursor` and forgets the cursor, whether or not the
    /// statement succeeded.
    pub fn close_cursor<'a>(
        &self,
        stmt: &Statement<'_>,
        cursor: &str,
        args: impl IntoIterator<Item = Arg<'a>>,
    ) -> Result<()> {
        entry(|| {
            let owner = self
                .cursor_connection(cursor)
                .ok_or_else(|| Error::UnknownCursor {
                    line: stmt.line,
                    name: cursor.to_owned(),
                })?;

            let stmt = Statement {
                connection: Some(owner.as_str()),
                ..*stmt
            };
            let outcome = self.execute_in(&stmt, args);

            if let Ok(conn) = self.connection(stmt.line, Some(owner.as_str())) {
                conn.lock().cursors.retain(|name| name != cursor);
            }

            outcome
        })
    }
}
