//! The statement execution engine.
//!
//! A statement is built from its host variables, bound either by splicing literals into
//! `?` placeholders or as parameters of a prepared statement, sent to the backend, and its
//! result classified and decoded into the output variables.

use std::borrow::Cow;

use smallvec::SmallVec;

use crate::backend::{QueryResult, ResultStatus};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::runtime::{entry, Runtime};
use crate::sqlca;
use crate::sqlda::Sqlda;
use crate::types::CompatMode;
use crate::value::decode::{store_result, DecodeContext};
use crate::value::encode::{store_input, EncodeContext, Mode};
use crate::variable::{Arg, Storage, Variable, VariableList};

/// How the text of a [`Statement`] is interpreted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// SQL text with `?` placeholders.
    Normal,

    /// The name of a prepared statement.
    Execute,

    /// SQL text prepared through the statement cache, then executed by name.
    AutoPrepare,
}

/// One embedded SQL statement as generated code issues it.
#[derive(Debug, Copy, Clone)]
pub struct Statement<'q> {
    pub(crate) line: i32,
    pub(crate) compat: CompatMode,
    pub(crate) force_indicator: bool,
    pub(crate) connection: Option<&'q str>,
    pub(crate) questionmarks: bool,
    pub(crate) kind: StatementKind,
    pub(crate) query: &'q str,
}

impl<'q> Statement<'q> {
    pub fn new(line: i32, query: &'q str) -> Self {
        Self {
            line,
            compat: CompatMode::Pgsql,
            force_indicator: true,
            connection: None,
            questionmarks: false,
            kind: StatementKind::Normal,
            query,
        }
    }

    /// Sets the compatibility mode; Informix modes also stop requiring indicators for NULLs.
    pub fn compat(mut self, compat: CompatMode) -> Self {
        self.compat = compat;
        self.force_indicator = !compat.is_informix();
        self
    }

    pub fn force_indicator(mut self, force: bool) -> Self {
        self.force_indicator = force;
        self
    }

    /// Runs on the named connection instead of the current one.
    pub fn connection(mut self, name: &'q str) -> Self {
        self.connection = Some(name);
        self
    }

    /// Treats `?` as a parameter marker when the statement is prepared.
    pub fn questionmarks(mut self, on: bool) -> Self {
        self.questionmarks = on;
        self
    }

    pub fn kind(mut self, kind: StatementKind) -> Self {
        self.kind = kind;
        self
    }
}

type Params = SmallVec<[Option<String>; 8]>;

/// Position of the next `?` that is not inside a quoted string.
fn next_insert(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut quoted = false;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 1,
            b'\'' => quoted = !quoted,
            b'?' if !quoted => return Some(pos),
            _ => {}
        }
        pos += 1;
    }

    None
}

/// Splices `values` into the placeholders of `query`, NULL as `null`.
fn substitute(line: i32, query: &str, values: &[Option<String>]) -> Result<String> {
    let mut text = String::with_capacity(query.len() + values.len() * 8);
    let mut rest = query;

    for value in values {
        let at = next_insert(rest).ok_or(Error::TooManyArguments { line })?;

        text.push_str(&rest[..at]);
        text.push_str(value.as_deref().unwrap_or("null"));
        rest = &rest[at + 1..];
    }

    if next_insert(rest).is_some() {
        return Err(Error::TooFewArguments { line });
    }

    text.push_str(rest);
    Ok(text)
}

fn is_transaction_command(text: &str) -> bool {
    let word = text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    matches!(
        word.as_str(),
        "begin" | "start" | "commit" | "rollback" | "end" | "abort"
    )
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len() && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

impl Runtime {
    /// Executes `stmt` with its input variables, then [`Arg::EndOfInput`] and its output
    /// variables.
    ///
    /// A query that returns no rows fails with [`Error::NotFound`]. An UPDATE, INSERT or
    /// DELETE that affects no rows succeeds but records NOT FOUND in the diagnostic area.
    pub fn execute<'a>(
        &self,
        stmt: &Statement<'_>,
        args: impl IntoIterator<Item = Arg<'a>>,
    ) -> Result<()> {
        entry(|| self.execute_in(stmt, args))
    }

    pub(crate) fn execute_in<'a>(
        &self,
        stmt: &Statement<'_>,
        args: impl IntoIterator<Item = Arg<'a>>,
    ) -> Result<()> {
        let line = stmt.line;
        let mut vars = VariableList::build(line, stmt.query, args)?;
        let conn = self.connection(line, stmt.connection)?;

        let (kind, name) = match stmt.kind {
            StatementKind::AutoPrepare => {
                let name = self.auto_prepare_in(
                    line,
                    stmt.compat,
                    stmt.connection,
                    stmt.questionmarks,
                    stmt.query,
                )?;
                (StatementKind::Execute, Cow::Owned(name))
            }
            kind => (kind, Cow::Borrowed(stmt.query)),
        };

        let mut guard = conn.lock();
        let conn = &mut *guard;

        let outcome = self.run(stmt, conn, kind, &name, &mut vars);
        conn.drain_notifications(line);

        outcome
    }

    fn run(
        &self,
        stmt: &Statement<'_>,
        conn: &mut Connection,
        kind: StatementKind,
        query: &str,
        vars: &mut VariableList<'_>,
    ) -> Result<()> {
        let line = stmt.line;
        let compat = stmt.compat;

        let mode = match kind {
            StatementKind::Normal => Mode::Literal,
            _ => Mode::Param,
        };
        let values = self.encode_inputs(stmt, conn, mode, &vars.inputs)?;

        let result = match kind {
            StatementKind::Normal => {
                let text = substitute(line, query, &values)?;

                if !is_transaction_command(&text) {
                    conn.begin_if_needed(line, compat)?;
                }

                log::debug!(
                    target: "ecpg",
                    "on line {}: query: {}; with {} parameter(s) on connection {}",
                    line,
                    text,
                    values.len(),
                    conn.name
                );

                let result = log_statement!(line, conn.name, &text, conn.backend.exec(&text));
                conn.check(line, compat, result)?
            }
            _ => {
                let (text, nparams) = match conn.find_prepared(query) {
                    Some(prepared) => (prepared.text.clone(), prepared.nparams),
                    None => {
                        return Err(Error::InvalidStatement {
                            line,
                            name: query.to_owned(),
                        })
                    }
                };

                if values.len() > nparams {
                    return Err(Error::TooManyArguments { line });
                }
                if values.len() < nparams {
                    return Err(Error::TooFewArguments { line });
                }

                if !is_transaction_command(&text) {
                    conn.begin_if_needed(line, compat)?;
                }

                for (i, value) in values.iter().enumerate() {
                    log::trace!(
                        target: "ecpg",
                        "on line {}: parameter {} = {}",
                        line,
                        i + 1,
                        value.as_deref().unwrap_or("null")
                    );
                }

                let result = log_statement!(
                    line,
                    conn.name,
                    &text,
                    conn.backend.exec_prepared(query, &values)
                );
                conn.check(line, compat, result)?
            }
        };

        self.classify(stmt, conn, result, &mut vars.outputs)
    }

    /// Encodes every input variable, expanding descriptors and SQLDAs into one value per
    /// item or column.
    fn encode_inputs(
        &self,
        stmt: &Statement<'_>,
        conn: &Connection,
        mode: Mode,
        inputs: &[Variable<'_>],
    ) -> Result<Params> {
        let line = stmt.line;
        let escape = |text: &str| conn.backend.escape_literal(text);
        let cx = EncodeContext {
            force_indicator: stmt.force_indicator,
            ..EncodeContext::new(line, stmt.compat, mode).escape(&escape)
        };

        let mut values = Params::new();

        for var in inputs {
            match &var.storage {
                Storage::Descriptor(name) => {
                    values.extend(self.descriptors.inputs(line, name, mode)?);
                }
                Storage::Sqlda(list) => {
                    let Some(sqlda) = list.first() else {
                        continue;
                    };

                    for column in sqlda.input_variables() {
                        values.push(store_input(&cx, &column)?);
                    }
                }
                _ => values.push(store_input(&cx, var)?),
            }
        }

        Ok(values)
    }

    fn classify(
        &self,
        stmt: &Statement<'_>,
        conn: &mut Connection,
        result: QueryResult,
        outputs: &mut [Variable<'_>],
    ) -> Result<()> {
        let line = stmt.line;
        let compat = stmt.compat;

        match result.status() {
            ResultStatus::TuplesOk => self.store_tuples(stmt, conn, result, outputs),

            ResultStatus::CommandOk => {
                let rows = result.cmd_tuples();
                let tag = result.command_tag();

                log::debug!(target: "ecpg", "on line {}: OK: {}", line, tag);

                sqlca::set_oid(i64::from(result.oid_value()));
                sqlca::set_rows(rows);

                if rows == 0
                    && compat != CompatMode::InformixSe
                    && ["UPDATE", "INSERT", "DELETE"]
                        .iter()
                        .any(|verb| starts_with_ignore_case(tag, verb))
                {
                    sqlca::raise(&Error::NotFound { line });
                }

                Ok(())
            }

            ResultStatus::CopyIn | ResultStatus::CopyOut => {
                log::debug!(target: "ecpg", "on line {}: COPY is not supported; ending it", line);
                conn.backend.end_copy();
                Ok(())
            }

            // anything else was turned into an error by the connection already
            _ => conn.check(line, compat, Some(result)).map(drop),
        }
    }

    fn store_tuples(
        &self,
        stmt: &Statement<'_>,
        conn: &mut Connection,
        result: QueryResult,
        outputs: &mut [Variable<'_>],
    ) -> Result<()> {
        let line = stmt.line;
        let compat = stmt.compat;
        let ntuples = result.ntuples();
        let nfields = result.nfields();

        log::debug!(
            target: "ecpg",
            "on line {}: correctly got {} tuples with {} fields",
            line,
            ntuples,
            nfields
        );

        sqlca::set_rows(ntuples as i64);

        if let Some(name) = outputs.first().and_then(Variable::descriptor_name) {
            let name = name.to_owned();
            self.descriptors.set_result(line, &name, result)?;

            log::debug!(target: "ecpg", "on line {}: result stored in descriptor {}", line, name);

            return match ntuples {
                0 => Err(Error::NotFound { line }),
                _ => Ok(()),
            };
        }

        if ntuples == 0 {
            log::debug!(target: "ecpg", "on line {}: no rows", line);
            return Err(Error::NotFound { line });
        }

        if let Some(Variable {
            storage: Storage::Sqlda(list),
            ..
        }) = outputs.first_mut()
        {
            list.clear();
            for row in 0..ntuples {
                list.push(Sqlda::build(line, &result, Some(row), compat)?);
            }

            log::debug!(target: "ecpg", "on line {}: {} sqlda(s) built", line, ntuples);
            return Ok(());
        }

        let cx = DecodeContext {
            line,
            compat,
            force_indicator: stmt.force_indicator,
        };

        let mut vars = outputs.iter_mut();
        for (field, desc) in result.fields().iter().enumerate() {
            let Some(var) = vars.next() else {
                if compat.is_informix() {
                    return Ok(());
                }
                return Err(Error::TooFewArguments { line });
            };

            let kind = conn
                .types
                .array_kind(&mut *conn.backend, line, compat, desc.type_oid)?;

            log::trace!(
                target: "ecpg",
                "on line {}: field {} ({}) as {:?} into {:?}",
                line,
                field,
                desc.name,
                kind,
                var.ty
            );

            store_result(&cx, &result, field, kind, var)?;
        }

        if vars.next().is_some() {
            return Err(Error::TooManyArguments { line });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_owned)).collect()
    }

    #[test]
    fn it_finds_placeholders_outside_strings() {
        assert_eq!(next_insert("select ?"), Some(7));
        assert_eq!(next_insert("select '?', ?"), Some(12));
        assert_eq!(next_insert(r"select 'it\'s ?', ?"), Some(18));
        assert_eq!(next_insert("select '?'"), None);
    }

    #[test]
    fn it_substitutes_in_order() {
        let text = substitute(
            1,
            "insert into t values (?, ?, '?')",
            &values(&[Some("1"), None]),
        )
        .unwrap();

        assert_eq!(text, "insert into t values (1, null, '?')");
    }

    #[test]
    fn it_counts_placeholders() {
        let query = "select ? + ?";

        assert!(matches!(
            substitute(4, query, &values(&[Some("1"), Some("2"), Some("3")])),
            Err(Error::TooManyArguments { line: 4 })
        ));
        assert!(matches!(
            substitute(5, query, &values(&[Some("1")])),
            Err(Error::TooFewArguments { line: 5 })
        ));
        assert_eq!(
            substitute(6, query, &values(&[Some("1"), Some("2")])).unwrap(),
            "select 1 + 2"
        );
    }

    #[test]
    fn it_recognizes_transaction_commands() {
        assert!(is_transaction_command("BEGIN"));
        assert!(is_transaction_command("  commit work"));
        assert!(!is_transaction_command("insert into t values (1)"));
        assert!(!is_transaction_command(""));
    }
}
