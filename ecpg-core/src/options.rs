//! Connection targets and runtime settings.

use std::env::var;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::Error;

/// Where and how to connect, parsed from the target of a `CONNECT TO` statement.
///
/// Three forms are understood:
///
/// ```text
/// dbname[@host][:port]
/// tcp:postgresql://host[:port][/dbname][?options]
/// unix:postgresql://localhost[:port][/dbname][?options]
/// ```
///
/// `options` are `key=value` pairs separated by `&` and are passed to the backend as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub(crate) database: Option<String>,
    pub(crate) host: Option<String>,
    pub(crate) port: Option<String>,
    pub(crate) user: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) options: Vec<(String, String)>,
    pub(crate) autocommit: bool,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_owned());
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_owned());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port.to_string());
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_owned());
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_owned());
        self
    }

    pub fn option(mut self, key: &str, value: &str) -> Self {
        self.options.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Commit every statement on its own instead of opening transactions implicitly.
    pub fn autocommit(mut self, on: bool) -> Self {
        self.autocommit = on;
        self
    }

    pub fn get_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn get_host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn get_port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Parses a connect target, returning a CONNECT error naming it on failure.
    pub fn parse_target(line: i32, target: &str) -> Result<Self, Error> {
        target.parse().map_err(|_: ParseError| Error::Connect {
            line,
            database: target.to_owned(),
        })
    }

    fn parse_options(&mut self, query: &str) {
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    self.options.push((key.trim().to_owned(), value.trim().to_owned()));
                }
                _ => {
                    tracing::warn!(option = pair, "ignoring unrecognized connect option");
                }
            }
        }
    }

    fn parse_legacy(target: &str) -> Result<Self, ParseError> {
        let mut options = ConnectOptions::new();

        let (rest, port) = match target.rsplit_once(':') {
            Some((rest, port)) => (rest, Some(port)),
            None => (target, None),
        };

        let (database, host) = match rest.split_once('@') {
            Some((database, host)) => (database, Some(host)),
            None => (rest, None),
        };

        if !database.is_empty() {
            options.database = Some(decode(database)?);
        }

        if let Some(host) = host.filter(|h| !h.is_empty()) {
            options.host = Some(decode(host)?);
        }

        if let Some(port) = port {
            port.parse::<u16>().map_err(|_| ParseError)?;
            options.port = Some(port.to_owned());
        }

        Ok(options)
    }

    fn parse_url(target: &str, unix: bool) -> Result<Self, ParseError> {
        let url = Url::parse(target).map_err(|_| ParseError)?;
        if url.scheme() != "postgresql" {
            return Err(ParseError);
        }

        let mut options = ConnectOptions::new();

        match url.host_str() {
            Some(host) if unix => {
                // unix sockets only reach the local machine
                if host != "localhost" && host != "127.0.0.1" {
                    tracing::warn!(host, "unix socket target must name the local host");
                    return Err(ParseError);
                }
            }
            Some(host) if !host.is_empty() => options.host = Some(decode(host)?),
            _ => {}
        }

        if let Some(port) = url.port() {
            options.port = Some(port.to_string());
        }

        let path = url.path().trim_start_matches('/');
        if !path.is_empty() {
            options.database = Some(decode(path)?);
        }

        if let Some(query) = url.query() {
            options.parse_options(query);
        }

        Ok(options)
    }

    /// The ordered keyword/value pairs handed to the backend connector.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = self.options.clone();

        let named = [
            ("dbname", &self.database),
            ("host", &self.host),
            ("port", &self.port),
            ("user", &self.user),
            ("password", &self.password),
        ];

        for (key, value) in named {
            if let Some(value) = value {
                params.push((key.to_owned(), value.clone()));
            }
        }

        params
    }
}

fn decode(text: &str) -> Result<String, ParseError> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|text| text.into_owned())
        .map_err(|_| ParseError)
}

/// A connect target that could not be understood.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParseError;

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid connect target")
    }
}

impl std::error::Error for ParseError {}

impl FromStr for ConnectOptions {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("tcp:") {
            return Self::parse_url(rest, false);
        }

        if let Some(rest) = s.strip_prefix("unix:") {
            return Self::parse_url(rest, true);
        }

        Self::parse_legacy(s)
    }
}

const DEFAULT_STMT_CACHE_BUCKETS: usize = 2039;
const DEFAULT_STMT_CACHE_ENTRIES_PER_BUCKET: usize = 8;
const DEFAULT_STMT_CACHE_KEY_LEN: usize = 50;

/// Settings of a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub(crate) stmt_cache_buckets: usize,
    pub(crate) stmt_cache_entries_per_bucket: usize,
    pub(crate) stmt_cache_key_len: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeOptions {
    pub fn new() -> Self {
        Self {
            stmt_cache_buckets: DEFAULT_STMT_CACHE_BUCKETS,
            stmt_cache_entries_per_bucket: DEFAULT_STMT_CACHE_ENTRIES_PER_BUCKET,
            stmt_cache_key_len: DEFAULT_STMT_CACHE_KEY_LEN,
        }
    }

    /// Defaults, overridden by `ECPG_STMT_CACHE_BUCKETS` and
    /// `ECPG_STMT_CACHE_ENTRIES_PER_BUCKET` when they are set.
    pub fn from_env() -> Self {
        let mut options = Self::new();

        if let Some(buckets) = env_usize("ECPG_STMT_CACHE_BUCKETS") {
            options = options.stmt_cache_buckets(buckets);
        }

        if let Some(entries) = env_usize("ECPG_STMT_CACHE_ENTRIES_PER_BUCKET") {
            options = options.stmt_cache_entries_per_bucket(entries);
        }

        options
    }

    /// Number of hash buckets of the auto-prepare cache.
    pub fn stmt_cache_buckets(mut self, buckets: usize) -> Self {
        self.stmt_cache_buckets = buckets.max(1);
        self
    }

    /// Number of statements one bucket holds before the least used one is evicted.
    pub fn stmt_cache_entries_per_bucket(mut self, entries: usize) -> Self {
        self.stmt_cache_entries_per_bucket = entries.max(1);
        self
    }

    /// Number of leading characters of a statement that are hashed.
    pub fn stmt_cache_key_len(mut self, len: usize) -> Self {
        self.stmt_cache_key_len = len.max(1);
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let value = var(name).ok()?;

    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value = %value, "ignoring non-numeric setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_legacy_targets() {
        let options: ConnectOptions = "mydb@db.example.com:5433".parse().unwrap();
        assert_eq!(options.get_database(), Some("mydb"));
        assert_eq!(options.get_host(), Some("db.example.com"));
        assert_eq!(options.get_port(), Some("5433"));

        let options: ConnectOptions = "my%20db".parse().unwrap();
        assert_eq!(options.get_database(), Some("my db"));
        assert_eq!(options.get_host(), None);

        assert!("db:port".parse::<ConnectOptions>().is_err());
    }

    #[test]
    fn it_parses_url_targets() {
        let options: ConnectOptions = "tcp:postgresql://localhost:5432/test?connect_timeout=10&application_name=ecpg"
            .parse()
            .unwrap();

        assert_eq!(options.get_database(), Some("test"));
        assert_eq!(
            options.to_params(),
            [
                ("connect_timeout".to_owned(), "10".to_owned()),
                ("application_name".to_owned(), "ecpg".to_owned()),
                ("dbname".to_owned(), "test".to_owned()),
                ("host".to_owned(), "localhost".to_owned()),
                ("port".to_owned(), "5432".to_owned()),
            ]
        );
    }

    #[test]
    fn it_keeps_unix_targets_local() {
        let options: ConnectOptions = "unix:postgresql://localhost/test".parse().unwrap();
        assert_eq!(options.get_host(), None);
        assert_eq!(options.get_database(), Some("test"));

        assert!("unix:postgresql://db.example.com/test"
            .parse::<ConnectOptions>()
            .is_err());

        assert!(matches!(
            ConnectOptions::parse_target(4, "unix:postgresql://remote/test"),
            Err(Error::Connect { line: 4, .. })
        ));
    }

    #[test]
    fn it_skips_options_without_values() {
        let options: ConnectOptions = "tcp:postgresql://h/db?flag&sslmode=require".parse().unwrap();

        assert_eq!(options.options, [("sslmode".to_owned(), "require".to_owned())]);
    }

    #[test]
    fn it_clamps_cache_geometry() {
        let options = RuntimeOptions::new()
            .stmt_cache_buckets(0)
            .stmt_cache_entries_per_bucket(2);

        assert_eq!(options.stmt_cache_buckets, 1);
        assert_eq!(options.stmt_cache_entries_per_bucket, 2);
        assert_eq!(options.stmt_cache_key_len, 50);
    }
}
