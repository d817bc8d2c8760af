//! Named prepared statements and the auto-prepare cache.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::options::RuntimeOptions;
use crate::runtime::{entry, Runtime};
use crate::types::CompatMode;

/// A statement prepared on one connection.
#[derive(Debug, Clone)]
pub(crate) struct PreparedStatement {
    pub(crate) name: String,

    /// Statement text with host-variable references replaced by `$N` markers.
    pub(crate) text: String,
    pub(crate) nparams: usize,
}

fn is_var_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'>' | b'-' | b'.') || c >= 128
}

/// Replaces `:name` references, and `?` when `questionmarks` is set, by `$1`, `$2`, ...
///
/// Quoted literals are left alone and so is the `::` cast operator.
pub(crate) fn replace_variables(text: &str, questionmarks: bool) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 8);
    let mut counter = 1;
    let mut quoted = false;
    let mut copied = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c == b'\'' {
            quoted = !quoted;
        }

        if quoted {
            pos += 1;
            continue;
        }

        let len = match c {
            b':' if bytes.get(pos + 1) == Some(&b':') => {
                pos += 2;
                continue;
            }
            b':' => {
                let run = bytes[pos + 1..]
                    .iter()
                    .take_while(|&&c| is_var_char(c))
                    .count();

                if run == 0 {
                    pos += 1;
                    continue;
                }

                run + 1
            }
            b'?' if questionmarks => 1,
            _ => {
                pos += 1;
                continue;
            }
        };

        out.push_str(&text[copied..pos]);
        out.push('$');
        out.push_str(itoa::Buffer::new().format(counter));
        counter += 1;

        pos += len;
        copied = pos;
    }

    out.push_str(&text[copied..]);
    out
}

/// Highest `$N` marker outside quoted literals.
pub(crate) fn count_params(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut quoted = false;
    let mut highest = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'\'' => quoted = !quoted,
            b'$' if !quoted => {
                let digits = bytes[pos + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit())
                    .count();

                if let Some(n) = atoi::atoi::<usize>(&bytes[pos + 1..pos + 1 + digits]) {
                    highest = highest.max(n);
                }

                pos += digits;
            }
            _ => {}
        }

        pos += 1;
    }

    highest
}

impl Connection {
    /// Prepares `query` as `name`, replacing a statement of that name.
    pub(crate) fn prepare(
        &mut self,
        line: i32,
        compat: CompatMode,
        name: &str,
        query: &str,
        questionmarks: bool,
    ) -> Result<()> {
        if let Some(at) = self.prepared.iter().position(|stmt| stmt.name == name) {
            self.deallocate_one(line, CompatMode::Pgsql, at)?;
        }

        self.prepare_common(line, compat, name, query, questionmarks)
    }

    pub(crate) fn prepare_common(
        &mut self,
        line: i32,
        compat: CompatMode,
        name: &str,
        query: &str,
        questionmarks: bool,
    ) -> Result<()> {
        let text = replace_variables(query, questionmarks);
        let nparams = count_params(&text);

        let result = log_statement!(
            line,
            self.name,
            &text,
            self.backend.prepare(name, &text, nparams)
        );
        self.check(line, compat, result)?;

        log::debug!(
            target: "ecpg",
            "on line {}: name {}; query: \"{}\"",
            line,
            name,
            text
        );

        self.prepared.push(PreparedStatement {
            name: name.to_owned(),
            text,
            nparams,
        });

        Ok(())
    }

    /// Releases the statement at `at` on the server and forgets it.
    ///
    /// A failure leaves the statement in place, except in Informix mode where it is
    /// forgotten all the same.
    pub(crate) fn deallocate_one(&mut self, line: i32, compat: CompatMode, at: usize) -> Result<()> {
        let name = self.prepared[at].name.clone();
        log::debug!(target: "ecpg", "on line {}: deallocating statement {}", line, name);

        if let Err(err) = self.exec(line, compat, &format!("deallocate \"{name}\"")) {
            log::debug!(target: "ecpg", "on line {}: deallocate failed: {}", line, err);

            if !compat.is_informix() {
                return Err(Error::InvalidStatement { line, name });
            }
        }

        self.prepared.remove(at);
        Ok(())
    }

    /// Releases every prepared statement, stopping at the first failure.
    pub(crate) fn deallocate_all(&mut self, line: i32, compat: CompatMode) -> Result<()> {
        while !self.prepared.is_empty() {
            self.deallocate_one(line, compat, 0)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    name: String,
    connection: String,
    query: String,
    execs: u64,
}

/// The auto-prepare cache: a fixed number of buckets holding a fixed number of statements.
///
/// A full bucket makes room by evicting the statement executed least often.
#[derive(Debug)]
pub(crate) struct StatementCache {
    buckets: usize,
    per_bucket: usize,
    key_len: usize,
    entries: Vec<Option<CacheEntry>>,
    next_id: u64,
}

impl StatementCache {
    pub(crate) fn new(options: &RuntimeOptions) -> Self {
        Self {
            buckets: options.stmt_cache_buckets,
            per_bucket: options.stmt_cache_entries_per_bucket,
            key_len: options.stmt_cache_key_len,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    fn hash(&self, query: &str) -> u64 {
        let mut hash: u64 = 0;

        for &c in query.as_bytes().iter().take(self.key_len) {
            hash += u64::from(c);
            // rotate the low 32 bits left by 13
            hash <<= 13;
            let rot = (hash & 0x1fff_0000_0000) >> 32;
            hash = (hash & 0xffff_ffff) | rot;
        }

        hash
    }

    fn bucket(&self, query: &str) -> std::ops::Range<usize> {
        let start = (self.hash(query) % self.buckets as u64) as usize * self.per_bucket;
        start..start + self.per_bucket
    }

    /// Slot and statement name of a cached `query`.
    fn search(&self, query: &str) -> Option<(usize, String)> {
        self.bucket(query).find_map(|slot| match self.entries.get(slot) {
            Some(Some(entry)) if entry.query == query => Some((slot, entry.name.clone())),
            _ => None,
        })
    }

    fn next_name(&mut self) -> String {
        let name = format!("ecpg{}", self.next_id);
        self.next_id += 1;
        name
    }

    /// The slot `query` goes to: the first free one of its bucket, otherwise the least
    /// executed. Returns the statement occupying it, if any.
    fn choose_slot(&mut self, query: &str) -> (usize, Option<CacheEntry>) {
        if self.entries.is_empty() {
            self.entries.resize(self.buckets * self.per_bucket, None);
        }

        let mut least_used: Option<usize> = None;

        for slot in self.bucket(query) {
            match &self.entries[slot] {
                None => return (slot, None),
                Some(entry) => {
                    let lower = least_used.map_or(true, |lu| {
                        self.entries[lu]
                            .as_ref()
                            .map_or(false, |lu| entry.execs < lu.execs)
                    });

                    if lower {
                        least_used = Some(slot);
                    }
                }
            }
        }

        let slot = least_used.unwrap_or_else(|| self.bucket(query).start);
        (slot, self.entries[slot].clone())
    }

    fn store(&mut self, slot: usize, entry: CacheEntry) {
        self.entries[slot] = Some(entry);
    }

    fn executed(&mut self, slot: usize) {
        if let Some(Some(entry)) = self.entries.get_mut(slot) {
            entry.execs += 1;
        }
    }
}

impl Runtime {
    /// Prepares `query` under `name` on the given connection, replacing a statement of
    /// that name.
    pub fn prepare(
        &self,
        line: i32,
        connection: Option<&str>,
        questionmarks: bool,
        name: &str,
        query: &str,
    ) -> Result<()> {
        entry(|| {
            let conn = self.connection(line, connection)?;
            let mut conn = conn.lock();
            conn.prepare(line, CompatMode::Pgsql, name, query, questionmarks)
        })
    }

    /// Releases the prepared statement `name`.
    ///
    /// An unknown name is an error, except in Informix mode.
    pub fn deallocate(
        &self,
        line: i32,
        compat: CompatMode,
        connection: Option<&str>,
        name: &str,
    ) -> Result<()> {
        entry(|| {
            let conn = self.connection(line, connection)?;
            let mut conn = conn.lock();

            match conn.prepared.iter().position(|stmt| stmt.name == name) {
                Some(at) => conn.deallocate_one(line, compat, at),
                None if compat.is_informix() => Ok(()),
                None => Err(Error::InvalidStatement {
                    line,
                    name: name.to_owned(),
                }),
            }
        })
    }

    /// Releases every statement prepared on the connection.
    pub fn deallocate_all(
        &self,
        line: i32,
        compat: CompatMode,
        connection: Option<&str>,
    ) -> Result<()> {
        entry(|| {
            let conn = self.connection(line, connection)?;
            let mut conn = conn.lock();
            conn.deallocate_all(line, compat)
        })
    }

    /// Text of the prepared statement `name`, after placeholder translation.
    pub fn prepared_statement(&self, connection: Option<&str>, name: &str) -> Option<String> {
        let conn = self.connections.get(connection)?;
        let conn = conn.lock();
        conn.find_prepared(name).map(|stmt| stmt.text.clone())
    }

    /// Prepares `query` under a generated name, reusing the cached statement when the same
    /// text was seen before, and returns the name.
    pub fn auto_prepare(
        &self,
        line: i32,
        compat: CompatMode,
        connection: Option<&str>,
        questionmarks: bool,
        query: &str,
    ) -> Result<String> {
        entry(|| self.auto_prepare_in(line, compat, connection, questionmarks, query))
    }

    pub(crate) fn auto_prepare_in(
        &self,
        line: i32,
        compat: CompatMode,
        connection: Option<&str>,
        questionmarks: bool,
        query: &str,
    ) -> Result<String> {
        let conn = self.connection(line, connection)?;
        let hit = self.stmt_cache.lock().search(query);

        let (slot, name) = match hit {
            Some((slot, name)) => {
                log::debug!(
                    target: "ecpg",
                    "on line {}: statement found in cache; entry {}",
                    line,
                    slot
                );

                // cached for another connection, perhaps
                let mut conn = conn.lock();
                if conn.find_prepared(&name).is_none() {
                    conn.prepare_common(line, compat, &name, query, questionmarks)?;
                }

                (slot, name)
            }
            None => {
                log::debug!(
                    target: "ecpg",
                    "on line {}: statement not in cache; inserting",
                    line
                );

                let name = self.stmt_cache.lock().next_name();

                let connection = {
                    let mut conn = conn.lock();
                    conn.prepare(line, CompatMode::Pgsql, &name, query, questionmarks)?;
                    conn.name.clone()
                };

                let (slot, evicted) = self.stmt_cache.lock().choose_slot(query);
                if let Some(evicted) = evicted {
                    self.evict(line, compat, &evicted)?;
                }

                self.stmt_cache.lock().store(
                    slot,
                    CacheEntry {
                        name: name.clone(),
                        connection,
                        query: query.to_owned(),
                        execs: 0,
                    },
                );

                (slot, name)
            }
        };

        self.stmt_cache.lock().executed(slot);
        Ok(name)
    }

    fn evict(&self, line: i32, compat: CompatMode, entry: &CacheEntry) -> Result<()> {
        log::debug!(
            target: "ecpg",
            "on line {}: evicting statement {} ({} executions)",
            line,
            entry.name,
            entry.execs
        );

        let Some(conn) = self.connections.get(Some(&entry.connection)) else {
            return Ok(());
        };

        let mut conn = conn.lock();
        match conn.prepared.iter().position(|stmt| stmt.name == entry.name) {
            Some(at) => conn.deallocate_one(line, compat, at),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_replaces_host_variables() {
        assert_eq!(
            replace_variables("SELECT a FROM t WHERE b = :x", false),
            "SELECT a FROM t WHERE b = $1"
        );
        assert_eq!(
            replace_variables("select :a, :b->c::text from t where d = ':e'", false),
            "select $1, $2::text from t where d = ':e'"
        );
        assert_eq!(
            replace_variables("insert into t values (?, ?)", true),
            "insert into t values ($1, $2)"
        );
        assert_eq!(replace_variables("select ?", false), "select ?");
        assert_eq!(replace_variables("select a[1 : 2]", false), "select a[1 : 2]");
    }

    #[test]
    fn it_counts_markers() {
        assert_eq!(count_params("select $1, $2, $1"), 2);
        assert_eq!(count_params("select '$3', $12"), 12);
        assert_eq!(count_params("select $$"), 0);
    }

    #[test]
    fn it_hashes_into_buckets() {
        let cache = StatementCache::new(&RuntimeOptions::new());

        let a = cache.bucket("select * from t where a = $1");
        assert_eq!(a.len(), 8);
        assert_eq!(a.start % 8, 0);
        assert_eq!(a, cache.bucket("select * from t where a = $1"));

        // only the key prefix counts
        let cache = StatementCache::new(&RuntimeOptions::new().stmt_cache_key_len(6));
        assert_eq!(cache.hash("select 1"), cache.hash("select 2"));
    }

    #[test]
    fn it_evicts_the_least_executed() {
        let options = RuntimeOptions::new()
            .stmt_cache_buckets(1)
            .stmt_cache_entries_per_bucket(2);
        let mut cache = StatementCache::new(&options);

        for (query, execs) in [("q1", 3), ("q2", 1)] {
            let (slot, evicted) = cache.choose_slot(query);
            assert!(evicted.is_none());

            cache.store(
                slot,
                CacheEntry {
                    name: cache_name(query),
                    connection: "c".into(),
                    query: query.into(),
                    execs,
                },
            );
        }

        let (slot, evicted) = cache.choose_slot("q3");
        assert_eq!(evicted.map(|e| e.query).as_deref(), Some("q2"));
        assert_eq!(slot, 1);
        assert_eq!(cache.search("q1").map(|(_, name)| name).as_deref(), Some("s-q1"));
    }

    fn cache_name(query: &str) -> String {
        format!("s-{query}")
    }
}

#[cfg(all(test, feature = "mock"))]
mod mock_tests {
    use super::*;
    use crate::backend::QueryResult;
    use crate::mock::{Call, MockBackend};

    fn connected() -> (MockBackend, Runtime) {
        let mock = MockBackend::new();
        let rt = Runtime::with_options(
            mock.clone(),
            RuntimeOptions::new()
                .stmt_cache_buckets(1)
                .stmt_cache_entries_per_bucket(2),
        );

        rt.connect(1, CompatMode::Pgsql, Some("db"), None).unwrap();
        mock.clear_calls();
        (mock, rt)
    }

    #[test]
    fn it_replaces_statements_of_the_same_name() {
        let (mock, rt) = connected();

        rt.prepare(2, None, false, "s", "select :a").unwrap();
        rt.prepare(3, None, false, "s", "select :a, :b").unwrap();

        assert_eq!(
            rt.prepared_statement(None, "s").as_deref(),
            Some("select $1, $2")
        );
        assert_eq!(
            mock.calls(),
            [
                Call::Prepare {
                    name: "s".into(),
                    sql: "select $1".into(),
                    nparams: 1
                },
                Call::Exec("deallocate \"s\"".into()),
                Call::Prepare {
                    name: "s".into(),
                    sql: "select $1, $2".into(),
                    nparams: 2
                },
            ]
        );
    }

    #[test]
    fn it_reports_failed_prepares() {
        let (mock, rt) = connected();
        mock.expect("prepare bad", QueryResult::error("42601", "syntax error at end of input"));

        let err = rt.prepare(2, None, false, "bad", "selec").unwrap_err();

        assert_eq!(err.sqlstate(), "42601");
        assert!(rt.prepared_statement(None, "bad").is_none());
    }

    #[test]
    fn unknown_statements_are_tolerated_by_informix() {
        let (_, rt) = connected();

        let err = rt.deallocate(2, CompatMode::Pgsql, None, "nope").unwrap_err();
        assert!(matches!(err, Error::InvalidStatement { ref name, .. } if name == "nope"));

        rt.deallocate(3, CompatMode::Informix, None, "nope").unwrap();
    }

    #[test]
    fn failed_deallocations_keep_the_statement() {
        let (mock, rt) = connected();
        rt.prepare(2, None, false, "s", "select 1").unwrap();

        mock.expect("deallocate", QueryResult::error("26000", "prepared statement \"s\" does not exist"));
        let err = rt.deallocate(3, CompatMode::Pgsql, None, "s").unwrap_err();

        assert_eq!(err.sqlcode(), crate::error::code::INVALID_STMT);
        assert!(rt.prepared_statement(None, "s").is_some());
    }

    #[test]
    fn auto_prepare_reuses_and_evicts() {
        let (mock, rt) = connected();

        let q1 = "select * from a";
        let q2 = "select * from b";
        let q3 = "select * from c";

        assert_eq!(rt.auto_prepare(2, CompatMode::Pgsql, None, false, q1).unwrap(), "ecpg1");
        assert_eq!(rt.auto_prepare(3, CompatMode::Pgsql, None, false, q1).unwrap(), "ecpg1");
        assert_eq!(rt.auto_prepare(4, CompatMode::Pgsql, None, false, q2).unwrap(), "ecpg2");

        mock.clear_calls();
        assert_eq!(rt.auto_prepare(5, CompatMode::Pgsql, None, false, q3).unwrap(), "ecpg3");

        assert_eq!(
            mock.calls(),
            [
                Call::Prepare {
                    name: "ecpg3".into(),
                    sql: q3.into(),
                    nparams: 0
                },
                Call::Exec("deallocate \"ecpg2\"".into()),
            ]
        );
        assert!(rt.prepared_statement(None, "ecpg2").is_none());
        assert!(rt.prepared_statement(None, "ecpg1").is_some());
    }

    #[test]
    fn cache_hits_are_prepared_on_each_connection() {
        let (mock, rt) = connected();
        rt.auto_prepare(2, CompatMode::Pgsql, None, false, "select 1").unwrap();

        rt.connect(3, CompatMode::Pgsql, Some("other"), None).unwrap();
        mock.clear_calls();

        let name = rt
            .auto_prepare(4, CompatMode::Pgsql, Some("other"), false, "select 1")
            .unwrap();

        assert_eq!(name, "ecpg1");
        assert_eq!(
            mock.calls(),
            [Call::Prepare {
                name: "ecpg1".into(),
                sql: "select 1".into(),
                nparams: 0
            }]
        );
    }
}
