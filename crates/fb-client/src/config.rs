//! Connection descriptor parsing and validation.
//!
//! A descriptor is a `;`-separated list of `key=value` pairs:
//!
//! ```text
//! data source=localhost;port=3050;database=/data/app.fdb;user id=SYSDBA;password=masterkey
//! ```
//!
//! Keys are case-insensitive and several aliases are accepted. Values may be
//! quoted with `'` or `"` to carry a `;`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use fb_pool::PoolConfig;
use fb_protocol::charset::{self, Charset};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::transaction::IsolationLevel;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3050;
/// Default page size for created databases.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;
/// Supported database page sizes.
pub const PAGE_SIZES: [u32; 6] = [1024, 2048, 4096, 8192, 16384, 32768];

/// `host:path` or `host/port:path`. Single-letter hosts are drive letters.
#[allow(clippy::expect_used)]
static SERVER_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<host>[^:/\\]{2,})(?:/(?P<port>\d{1,5}))?:(?P<path>.+)$")
        .expect("server prefix pattern is valid")
});

/// Where the database engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerType {
    /// Remote server reached over TCP.
    #[default]
    Default,
    /// In-process engine. Not supported by this client.
    Embedded,
}

/// Parsed connection descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Server host name or address.
    pub data_source: String,
    /// Server port.
    pub port: u16,
    /// Database path or alias on the server.
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// SQL role.
    pub role: Option<String>,
    /// Connection character set name.
    pub charset: String,
    /// SQL dialect (1, 2 or 3).
    pub dialect: u8,
    /// Page size used when creating databases.
    pub page_size: u32,
    /// Whether sessions are pooled.
    pub pooling: bool,
    /// Bound on session establishment and pool checkout. Zero waits
    /// indefinitely for both.
    pub connection_timeout: Duration,
    /// Network packet size.
    pub packet_size: u32,
    /// Enlist in the ambient transaction on open.
    pub enlist: bool,
    /// Sessions opened when the pool is first used.
    pub min_pool_size: u32,
    /// Maximum live sessions per pool.
    pub max_pool_size: u32,
    /// Pooled sessions older than this are discarded; zero means unlimited.
    pub connection_lifetime: Duration,
    /// Default isolation level for new transactions.
    pub isolation_level: IsolationLevel,
    /// Server type.
    pub server_type: ServerType,
    /// Skip database triggers on connect.
    pub no_db_triggers: bool,
    /// Disable garbage collection for the attachment.
    pub no_garbage_collect: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            data_source: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            role: None,
            charset: "NONE".to_string(),
            dialect: 3,
            page_size: DEFAULT_PAGE_SIZE,
            pooling: true,
            connection_timeout: Duration::from_secs(15),
            packet_size: 8192,
            enlist: false,
            min_pool_size: 0,
            max_pool_size: 100,
            connection_lifetime: Duration::ZERO,
            isolation_level: IsolationLevel::ReadCommitted,
            server_type: ServerType::Default,
            no_db_triggers: false,
            no_garbage_collect: false,
        }
    }
}

impl ConnectionOptions {
    /// Parse a connection descriptor.
    ///
    /// Fails with [`Error::InvalidDescriptor`] on malformed pairs, unknown
    /// keys and out-of-range values. Later duplicates override earlier ones.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut options = Self::default();

        for (key, value) in split_pairs(descriptor)? {
            let key = normalize_key(&key);
            let value = value.as_str();

            match key.as_str() {
                "data source" | "datasource" | "server" | "host" => {
                    options.data_source = value.to_string();
                }
                "port" | "port number" => {
                    options.port = parse_number::<u16>(&key, value)?;
                    if options.port == 0 {
                        return Err(invalid("port must be between 1 and 65535"));
                    }
                }
                "database" | "initial catalog" => options.database = value.to_string(),
                "user id" | "userid" | "user" | "uid" | "user name" => {
                    options.user = value.to_string();
                }
                "password" | "pwd" | "user password" => options.password = value.to_string(),
                "role" | "role name" => {
                    options.role = (!value.is_empty()).then(|| value.to_string());
                }
                "charset" | "character set" => options.charset = value.to_string(),
                "dialect" => {
                    options.dialect = parse_number::<u8>(&key, value)?;
                    if !(1..=3).contains(&options.dialect) {
                        return Err(invalid(format!(
                            "dialect must be 1, 2 or 3, found {}",
                            options.dialect
                        )));
                    }
                }
                "page size" | "pagesize" => {
                    options.page_size = parse_number::<u32>(&key, value)?;
                    if !PAGE_SIZES.contains(&options.page_size) {
                        return Err(invalid(format!(
                            "unsupported page size {}",
                            options.page_size
                        )));
                    }
                }
                "pooling" => options.pooling = parse_bool(&key, value)?,
                "connection timeout" | "connect timeout" | "timeout" => {
                    options.connection_timeout =
                        Duration::from_secs(parse_number::<u64>(&key, value)?);
                }
                "packet size" => {
                    options.packet_size = parse_number::<u32>(&key, value)?;
                    if !(512..=32767).contains(&options.packet_size) {
                        return Err(invalid(format!(
                            "packet size must be between 512 and 32767, found {}",
                            options.packet_size
                        )));
                    }
                }
                "enlist" => options.enlist = parse_bool(&key, value)?,
                "min pool size" => options.min_pool_size = parse_number::<u32>(&key, value)?,
                "max pool size" => options.max_pool_size = parse_number::<u32>(&key, value)?,
                "connection lifetime" => {
                    options.connection_lifetime =
                        Duration::from_secs(parse_number::<u64>(&key, value)?);
                }
                "isolation level" => {
                    options.isolation_level = value
                        .parse()
                        .map_err(|_| invalid(format!("unknown isolation level '{value}'")))?;
                }
                "server type" | "servertype" => {
                    options.server_type = match value {
                        "0" => ServerType::Default,
                        "1" => ServerType::Embedded,
                        other => return Err(invalid(format!("unknown server type '{other}'"))),
                    };
                }
                "no db triggers" => options.no_db_triggers = parse_bool(&key, value)?,
                "no garbage collect" => options.no_garbage_collect = parse_bool(&key, value)?,
                _ => return Err(invalid(format!("unknown key '{key}'"))),
            }
        }

        options.split_server_prefix()?;
        Ok(options)
    }

    /// Move a `host[/port]:path` prefix of the database into the data
    /// source and port fields.
    fn split_server_prefix(&mut self) -> Result<()> {
        let Some(caps) = SERVER_PREFIX_RE.captures(&self.database) else {
            return Ok(());
        };
        let host = caps["host"].to_string();
        let port = caps
            .name("port")
            .map(|m| parse_number::<u16>("port", m.as_str()))
            .transpose()?;
        let path = caps["path"].to_string();

        self.data_source = host;
        if let Some(port) = port {
            self.port = port;
        }
        self.database = path;
        Ok(())
    }

    /// Check the options are complete and consistent.
    ///
    /// Fails with [`Error::InvalidConfiguration`].
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "database must be specified".into(),
            ));
        }
        if self.user.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "user id must be specified".into(),
            ));
        }
        if self.data_source.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "data source must be specified".into(),
            ));
        }
        charset::resolve(&self.charset)?;
        if !(1..=3).contains(&self.dialect) {
            return Err(Error::InvalidConfiguration(format!(
                "invalid dialect {}",
                self.dialect
            )));
        }
        if self.server_type == ServerType::Embedded {
            return Err(Error::InvalidConfiguration(
                "the embedded server type is not supported".into(),
            ));
        }
        if self.pooling {
            if self.max_pool_size == 0 {
                return Err(Error::InvalidConfiguration(
                    "max pool size must be greater than 0".into(),
                ));
            }
            if self.min_pool_size > self.max_pool_size {
                return Err(Error::InvalidConfiguration(format!(
                    "min pool size ({}) cannot exceed max pool size ({})",
                    self.min_pool_size, self.max_pool_size
                )));
            }
        }
        Ok(())
    }

    /// Resolved connection charset.
    pub fn resolved_charset(&self) -> Result<&'static Charset> {
        Ok(charset::resolve(&self.charset)?)
    }

    /// Canonical descriptor. Two descriptors naming the same settings yield
    /// the same string, whatever order and aliases they used.
    #[must_use]
    pub fn canonical(&self) -> String {
        let pairs: [(&str, String); 20] = [
            ("data source", self.data_source.clone()),
            ("port", self.port.to_string()),
            ("database", self.database.clone()),
            ("user id", self.user.clone()),
            ("password", self.password.clone()),
            ("role", self.role.clone().unwrap_or_default()),
            ("charset", self.charset.to_ascii_uppercase()),
            ("dialect", self.dialect.to_string()),
            ("page size", self.page_size.to_string()),
            ("pooling", self.pooling.to_string()),
            (
                "connection timeout",
                self.connection_timeout.as_secs().to_string(),
            ),
            ("packet size", self.packet_size.to_string()),
            ("enlist", self.enlist.to_string()),
            ("min pool size", self.min_pool_size.to_string()),
            ("max pool size", self.max_pool_size.to_string()),
            (
                "connection lifetime",
                self.connection_lifetime.as_secs().to_string(),
            ),
            ("isolation level", self.isolation_level.to_string()),
            (
                "server type",
                match self.server_type {
                    ServerType::Default => "0".to_string(),
                    ServerType::Embedded => "1".to_string(),
                },
            ),
            ("no db triggers", self.no_db_triggers.to_string()),
            ("no garbage collect", self.no_garbage_collect.to_string()),
        ];

        pairs
            .iter()
            .map(|(key, value)| format!("{key}={}", quote(value)))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Copy of these options pointing at another database. A
    /// `host[/port]:path` prefix moves the copy to that server, as it
    /// would in a descriptor.
    pub fn with_database(&self, database: impl Into<String>) -> Result<Self> {
        let mut options = self.clone();
        options.database = database.into();
        options.split_server_prefix()?;
        Ok(options)
    }

    /// Pool settings derived from these options.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::new()
            .min_connections(self.min_pool_size)
            .max_connections(self.max_pool_size)
            .connection_timeout(self.connection_timeout);
        if !self.connection_lifetime.is_zero() {
            config = config.max_lifetime(self.connection_lifetime);
        }
        config
    }
}

impl FromStr for ConnectionOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("data_source", &self.data_source)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("charset", &self.charset)
            .field("dialect", &self.dialect)
            .field("pooling", &self.pooling)
            .field("connection_timeout", &self.connection_timeout)
            .field("enlist", &self.enlist)
            .finish_non_exhaustive()
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidDescriptor(msg.into())
}

/// Split a descriptor into raw `(key, value)` pairs.
///
/// A value is quoted only when `'` or `"` is its first non-blank character;
/// inside it the quote character is written twice. Unquoted values run to
/// the next `;` and may contain quotes.
fn split_pairs(descriptor: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = descriptor.chars().peekable();

    loop {
        let mut key = String::new();
        let mut has_value = false;
        for c in chars.by_ref() {
            match c {
                '=' => {
                    has_value = true;
                    break;
                }
                ';' => break,
                c => key.push(c),
            }
        }
        if !has_value {
            if !key.trim().is_empty() {
                return Err(invalid(format!("expected key=value, found '{}'", key.trim())));
            }
            if chars.peek().is_none() {
                return Ok(pairs);
            }
            continue;
        }

        while chars.next_if(|c| c.is_whitespace() && *c != ';').is_some() {}

        let value = match chars.next_if(|c| *c == '\'' || *c == '"') {
            Some(q) => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return Err(invalid("unterminated quoted value")),
                        Some(c) if c == q => {
                            if chars.next_if_eq(&q).is_some() {
                                value.push(q);
                            } else {
                                break;
                            }
                        }
                        Some(c) => value.push(c),
                    }
                }
                while chars.next_if(|c| *c != ';' && c.is_whitespace()).is_some() {}
                match chars.next() {
                    None | Some(';') => {}
                    Some(_) => {
                        return Err(invalid(format!(
                            "unexpected text after quoted value of '{}'",
                            key.trim()
                        )));
                    }
                }
                value
            }
            None => {
                let mut value = String::new();
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value.trim().to_string()
            }
        };
        pairs.push((key, value));
        if chars.peek().is_none() {
            return Ok(pairs);
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Quote a value for the canonical form when parsing it back would
/// otherwise change it.
fn quote(value: &str) -> String {
    let needs_quotes = value.contains(';')
        || value.starts_with(['\'', '"'])
        || value.trim() != value;
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(format!("invalid value '{value}' for '{key}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(format!("invalid boolean '{value}' for '{key}'"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASIC: &str = "data source=localhost;port=3050;database=test.fdb;\
                         user id=SYSDBA;password=masterkey;pooling=true";

    #[test]
    fn test_parse_basic_descriptor() {
        let options = ConnectionOptions::parse(BASIC).unwrap();
        assert_eq!(options.data_source, "localhost");
        assert_eq!(options.port, 3050);
        assert_eq!(options.database, "test.fdb");
        assert_eq!(options.user, "SYSDBA");
        assert_eq!(options.password, "masterkey");
        assert!(options.pooling);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_aliases_and_case() {
        let options = ConnectionOptions::parse(
            "Server=db1; Port Number=3051; Initial Catalog=emp; UID=alice; PWD=x; \
             Character Set=utf8; Connect Timeout=5",
        )
        .unwrap();
        assert_eq!(options.data_source, "db1");
        assert_eq!(options.port, 3051);
        assert_eq!(options.database, "emp");
        assert_eq!(options.user, "alice");
        assert_eq!(options.charset, "utf8");
        assert_eq!(options.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::parse("database=a.fdb;user=u").unwrap();
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.charset, "NONE");
        assert_eq!(options.dialect, 3);
        assert_eq!(options.packet_size, 8192);
        assert_eq!(options.max_pool_size, 100);
        assert!(options.pooling);
        assert!(!options.enlist);
    }

    #[test]
    fn test_quoted_value_with_semicolon() {
        let options =
            ConnectionOptions::parse("database=a.fdb;user=u;password='se;cret'").unwrap();
        assert_eq!(options.password, "se;cret");
    }

    #[test]
    fn test_apostrophe_inside_unquoted_value() {
        let options =
            ConnectionOptions::parse("database=a.fdb;user id=SYSDBA;password=it's").unwrap();
        assert_eq!(options.password, "it's");

        let options =
            ConnectionOptions::parse("database=a.fdb;user=u;password=O'Brien;charset=UTF8").unwrap();
        assert_eq!(options.password, "O'Brien");
        assert_eq!(options.charset, "UTF8");

        let options = ConnectionOptions::parse(r#"database=a.fdb;user=u;password=say "hi""#).unwrap();
        assert_eq!(options.password, r#"say "hi""#);
    }

    #[test]
    fn test_doubled_quotes_inside_quoted_value() {
        let options =
            ConnectionOptions::parse(r#"database=a.fdb;user=u;password="a""b;c'd""#).unwrap();
        assert_eq!(options.password, r#"a"b;c'd"#);

        let options = ConnectionOptions::parse("database=a.fdb;user=u;password='it''s'").unwrap();
        assert_eq!(options.password, "it's");
    }

    #[test]
    fn test_text_after_quoted_value_is_rejected() {
        assert!(matches!(
            ConnectionOptions::parse("database=a.fdb;user=u;password='x'y"),
            Err(Error::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_canonical_roundtrip_with_all_special_characters() {
        for password in [r#"a;b'c"d"#, r#""'"#, " padded ", "'lead", "x;", r#"""#] {
            let mut options = ConnectionOptions::parse(BASIC).unwrap();
            options.password = password.to_string();
            let reparsed = ConnectionOptions::parse(&options.canonical()).unwrap();
            assert_eq!(reparsed.password, password);
            assert_eq!(reparsed.canonical(), options.canonical());
        }
    }

    #[test]
    fn test_malformed_descriptors() {
        for bad in [
            "database",
            "database=a.fdb;colour=blue",
            "dialect=4",
            "page size=3000",
            "port=0",
            "port=seventy",
            "pooling=maybe",
            "packet size=100",
            "password='open",
            "server type=7",
        ] {
            assert!(
                matches!(ConnectionOptions::parse(bad), Err(Error::InvalidDescriptor(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let no_user = ConnectionOptions::parse("database=a.fdb").unwrap();
        assert!(matches!(
            no_user.validate(),
            Err(Error::InvalidConfiguration(_))
        ));

        let no_db = ConnectionOptions::parse("user=SYSDBA").unwrap();
        assert!(matches!(no_db.validate(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_charset() {
        let options = ConnectionOptions::parse("database=a.fdb;user=u;charset=KLINGON").unwrap();
        assert!(matches!(
            options.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_validate_pool_bounds_and_server_type() {
        let options =
            ConnectionOptions::parse("database=a;user=u;min pool size=5;max pool size=2").unwrap();
        assert!(options.validate().is_err());

        let options = ConnectionOptions::parse("database=a;user=u;server type=1").unwrap();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_server_prefix_in_database() {
        let options = ConnectionOptions::parse("database=fbhost/3051:/data/app.fdb;user=u").unwrap();
        assert_eq!(options.data_source, "fbhost");
        assert_eq!(options.port, 3051);
        assert_eq!(options.database, "/data/app.fdb");

        let options = ConnectionOptions::parse("database=fbhost:employee;user=u").unwrap();
        assert_eq!(options.data_source, "fbhost");
        assert_eq!(options.database, "employee");
    }

    #[test]
    fn test_with_database_splits_server_prefix() {
        let options = ConnectionOptions::parse(BASIC).unwrap();

        let local = options.with_database("other.fdb").unwrap();
        assert_eq!(local.data_source, "localhost");
        assert_eq!(local.database, "other.fdb");

        let remote = options.with_database("otherhost/3052:/data/b.fdb").unwrap();
        assert_eq!(remote.data_source, "otherhost");
        assert_eq!(remote.port, 3052);
        assert_eq!(remote.database, "/data/b.fdb");
        assert_eq!(
            remote,
            ConnectionOptions::parse(&format!("{BASIC};database=otherhost/3052:/data/b.fdb")).unwrap()
        );

        assert!(options.with_database("otherhost/99999:b.fdb").is_err());
    }

    #[test]
    fn test_drive_letter_is_not_a_host() {
        let options = ConnectionOptions::parse(r"database=C:\data\app.fdb;user=u").unwrap();
        assert_eq!(options.data_source, "localhost");
        assert_eq!(options.database, r"C:\data\app.fdb");
    }

    #[test]
    fn test_canonical_roundtrip() {
        let options = ConnectionOptions::parse(BASIC).unwrap();
        let reparsed = ConnectionOptions::parse(&options.canonical()).unwrap();
        assert_eq!(reparsed, options);
    }

    #[test]
    fn test_canonical_ignores_charset_case() {
        let a = ConnectionOptions::parse("database=a;user=u;charset=utf8").unwrap();
        let b = ConnectionOptions::parse("database=a;user=u;charset=UTF8").unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = ConnectionOptions::parse(BASIC).unwrap();
        let debug = format!("{options:?}");
        assert!(!debug.contains("masterkey"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_pool_config_from_options() {
        let options = ConnectionOptions::parse(
            "database=a;user=u;min pool size=2;max pool size=7;connection lifetime=60",
        )
        .unwrap();
        let config = options.pool_config();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 7);
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(60)));
    }

    proptest! {
        #[test]
        fn prop_canonical_is_order_independent(
            pairs in Just(vec![
                "data source=h",
                "port=3051",
                "database=x.fdb",
                "user id=u",
                "password=p",
                "charset=UTF8",
                "dialect=1",
                "pooling=false",
            ]).prop_shuffle()
        ) {
            let shuffled = ConnectionOptions::parse(&pairs.join(";")).unwrap();
            let reference = ConnectionOptions::parse(
                "data source=h;port=3051;database=x.fdb;user id=u;password=p;\
                 charset=UTF8;dialect=1;pooling=false",
            )
            .unwrap();
            prop_assert_eq!(shuffled.canonical(), reference.canonical());
        }

        #[test]
        fn prop_canonical_preserves_any_password(password in "[ -~]{0,24}") {
            let mut options = ConnectionOptions::parse(BASIC).unwrap();
            options.password = password.clone();
            let reparsed = ConnectionOptions::parse(&options.canonical()).unwrap();
            prop_assert_eq!(reparsed.password, password);
        }
    }
}
