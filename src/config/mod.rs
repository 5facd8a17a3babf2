//! Configuration for an archiving run.
//!
//! Two inputs are read once at startup: a JSON file listing the tables to
//! archive, and the process environment carrying the connection parameters
//! and the secret identifier.
//!
//! # Example
//!
//! ```json
//! [
//!   {
//!     "TABLE_NAME": "orders",
//!     "WHERE_CLAUSE": {
//!       "WHERE_KEYS": "status = 'closed'",
//!       "LIMIT": 100,
//!       "KEY": "order_id"
//!     }
//!   }
//! ]
//! ```

use std::path::Path;

use serde::Deserialize;

/// A validated per-table archive specification.
///
/// Records are rejected at load time; nothing downstream of this module sees
/// raw configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableArchiveSpec {
    /// Source table rows are moved out of.
    pub table: String,

    /// Row-filter expression selecting rows eligible for archiving.
    ///
    /// The same expression drives selection, the deletion batch, and the
    /// termination check, so it must stop matching a row once that row has
    /// been moved; otherwise the per-table loop never drains.
    pub predicate: String,

    /// Upper bound on rows moved per copy+delete cycle.
    pub batch_size: i64,

    /// Column uniquely identifying a row within one batch.
    pub key: String,
}

impl TableArchiveSpec {
    /// Name of the parallel archive table rows are moved into.
    pub fn archive_table(&self) -> String {
        format!("{}_archived", self.table)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("Environment variable {0} has invalid value {1:?}")]
    InvalidEnv(&'static str, String),
}

/// On-disk record shape. Field names follow the deployed configuration
/// format, not Rust conventions.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTableRecord {
    #[serde(rename = "TABLE_NAME")]
    table_name: String,

    #[serde(rename = "WHERE_CLAUSE")]
    where_clause: RawWhereClause,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWhereClause {
    #[serde(rename = "WHERE_KEYS")]
    where_keys: String,

    #[serde(rename = "LIMIT")]
    limit: i64,

    #[serde(rename = "KEY")]
    key: String,
}

/// Load and validate the ordered table list from a JSON config file.
///
/// Any I/O, parse, or validation failure is fatal; no partial configuration
/// is accepted.
pub fn load_specs(path: impl AsRef<Path>) -> Result<Vec<TableArchiveSpec>, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

    parse_specs(&contents)
}

/// Parse and validate the table list from a JSON string, preserving order.
pub fn parse_specs(contents: &str) -> Result<Vec<TableArchiveSpec>, ConfigError> {
    let records: Vec<RawTableRecord> = serde_json::from_str(contents)?;
    records.into_iter().map(validate_record).collect()
}

fn validate_record(record: RawTableRecord) -> Result<TableArchiveSpec, ConfigError> {
    if !is_plain_identifier(&record.table_name) {
        return Err(ConfigError::Validation(format!(
            "TABLE_NAME {:?} is not a plain SQL identifier",
            record.table_name
        )));
    }
    if !is_plain_identifier(&record.where_clause.key) {
        return Err(ConfigError::Validation(format!(
            "WHERE_CLAUSE.KEY {:?} for table {} is not a plain SQL identifier",
            record.where_clause.key, record.table_name
        )));
    }
    if record.where_clause.where_keys.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "WHERE_CLAUSE.WHERE_KEYS for table {} cannot be empty",
            record.table_name
        )));
    }
    if record.where_clause.limit < 1 {
        return Err(ConfigError::Validation(format!(
            "WHERE_CLAUSE.LIMIT for table {} must be at least 1, got {}",
            record.table_name, record.where_clause.limit
        )));
    }

    Ok(TableArchiveSpec {
        table: record.table_name,
        predicate: record.where_clause.where_keys,
        batch_size: record.where_clause.limit,
        key: record.where_clause.key,
    })
}

/// The only identifier shape accepted for table and column names:
/// `[A-Za-z_][A-Za-z0-9_]*`. This keeps the predicate as the sole
/// configuration field that may carry arbitrary SQL.
fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Connection parameters and secret-store coordinates, read once at startup.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    /// Name of the Secrets Manager secret holding the database credentials.
    pub secret_name: String,
    /// AWS region the secret lives in.
    pub region: String,
    /// Database host.
    pub db_host: String,
    /// Database name.
    pub db_name: String,
    /// Database port. Defaults to 5432.
    pub db_port: u16,
    /// Optional Secrets Manager endpoint override (localstack testing).
    pub secrets_endpoint: Option<String>,
}

impl EnvSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_port = match std::env::var("TABULARIUM_DB_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidEnv("TABULARIUM_DB_PORT", raw))?,
            Err(_) => 5432,
        };

        Ok(Self {
            secret_name: require_env("TABULARIUM_SECRET_NAME")?,
            region: require_env("TABULARIUM_REGION")?,
            db_host: require_env("TABULARIUM_DB_HOST")?,
            db_name: require_env("TABULARIUM_DB_NAME")?,
            db_port,
            secrets_endpoint: std::env::var("TABULARIUM_SECRETS_ENDPOINT").ok(),
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const EXAMPLE: &str = r#"[
        {
            "TABLE_NAME": "orders",
            "WHERE_CLAUSE": {
                "WHERE_KEYS": "status = 'closed'",
                "LIMIT": 100,
                "KEY": "order_id"
            }
        },
        {
            "TABLE_NAME": "sessions",
            "WHERE_CLAUSE": {
                "WHERE_KEYS": "expires_at < now() - interval '90 days'",
                "LIMIT": 500,
                "KEY": "session_id"
            }
        }
    ]"#;

    #[test]
    fn test_parse_documented_format() {
        let specs = parse_specs(EXAMPLE).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].table, "orders");
        assert_eq!(specs[0].predicate, "status = 'closed'");
        assert_eq!(specs[0].batch_size, 100);
        assert_eq!(specs[0].key, "order_id");
    }

    #[test]
    fn test_order_is_preserved() {
        let specs = parse_specs(EXAMPLE).unwrap();
        let tables: Vec<&str> = specs.iter().map(|s| s.table.as_str()).collect();
        assert_eq!(tables, vec!["orders", "sessions"]);
    }

    #[test]
    fn test_archive_table_name() {
        let specs = parse_specs(EXAMPLE).unwrap();
        assert_eq!(specs[0].archive_table(), "orders_archived");
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let contents = r#"[{
            "TABLE_NAME": "orders",
            "WHERE_CLAUSE": {"WHERE_KEYS": "status = 'closed'", "LIMIT": 0, "KEY": "order_id"}
        }]"#;
        let err = parse_specs(contents).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn test_rejects_non_identifier_table_name() {
        let contents = r#"[{
            "TABLE_NAME": "orders; DROP TABLE users",
            "WHERE_CLAUSE": {"WHERE_KEYS": "status = 'closed'", "LIMIT": 100, "KEY": "order_id"}
        }]"#;
        let err = parse_specs(contents).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn test_rejects_non_identifier_key() {
        let contents = r#"[{
            "TABLE_NAME": "orders",
            "WHERE_CLAUSE": {"WHERE_KEYS": "status = 'closed'", "LIMIT": 100, "KEY": "order id"}
        }]"#;
        let err = parse_specs(contents).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn test_rejects_empty_predicate() {
        let contents = r#"[{
            "TABLE_NAME": "orders",
            "WHERE_CLAUSE": {"WHERE_KEYS": "  ", "LIMIT": 100, "KEY": "order_id"}
        }]"#;
        let err = parse_specs(contents).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let contents = r#"[{
            "TABLE_NAME": "orders",
            "DROP_SOURCE": true,
            "WHERE_CLAUSE": {"WHERE_KEYS": "status = 'closed'", "LIMIT": 100, "KEY": "order_id"}
        }]"#;
        let err = parse_specs(contents).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = parse_specs("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn test_identifier_shapes() {
        assert!(is_plain_identifier("orders"));
        assert!(is_plain_identifier("_orders2"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("2orders"));
        assert!(!is_plain_identifier("orders\"; --"));
    }

    #[test]
    fn test_load_specs_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let specs = load_specs(file.path()).unwrap();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_specs("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)), "got {err:?}");
    }

    #[test]
    fn test_env_settings_from_env() {
        temp_env::with_vars(
            [
                ("TABULARIUM_SECRET_NAME", Some("prod/db")),
                ("TABULARIUM_REGION", Some("eu-west-1")),
                ("TABULARIUM_DB_HOST", Some("db.internal")),
                ("TABULARIUM_DB_NAME", Some("app")),
                ("TABULARIUM_DB_PORT", Some("5433")),
            ],
            || {
                let settings = EnvSettings::from_env().unwrap();
                assert_eq!(settings.secret_name, "prod/db");
                assert_eq!(settings.region, "eu-west-1");
                assert_eq!(settings.db_host, "db.internal");
                assert_eq!(settings.db_name, "app");
                assert_eq!(settings.db_port, 5433);
                assert_eq!(settings.secrets_endpoint, None);
            },
        );
    }

    #[test]
    fn test_env_settings_default_port() {
        temp_env::with_vars(
            [
                ("TABULARIUM_SECRET_NAME", Some("prod/db")),
                ("TABULARIUM_REGION", Some("eu-west-1")),
                ("TABULARIUM_DB_HOST", Some("db.internal")),
                ("TABULARIUM_DB_NAME", Some("app")),
                ("TABULARIUM_DB_PORT", None),
            ],
            || {
                let settings = EnvSettings::from_env().unwrap();
                assert_eq!(settings.db_port, 5432);
            },
        );
    }

    #[test]
    fn test_env_settings_missing_var() {
        temp_env::with_vars(
            [
                ("TABULARIUM_SECRET_NAME", None::<&str>),
                ("TABULARIUM_REGION", Some("eu-west-1")),
                ("TABULARIUM_DB_HOST", Some("db.internal")),
                ("TABULARIUM_DB_NAME", Some("app")),
            ],
            || {
                let err = EnvSettings::from_env().unwrap_err();
                assert!(
                    matches!(err, ConfigError::MissingEnv("TABULARIUM_SECRET_NAME")),
                    "got {err:?}"
                );
            },
        );
    }

    #[test]
    fn test_env_settings_invalid_port() {
        temp_env::with_vars(
            [
                ("TABULARIUM_SECRET_NAME", Some("prod/db")),
                ("TABULARIUM_REGION", Some("eu-west-1")),
                ("TABULARIUM_DB_HOST", Some("db.internal")),
                ("TABULARIUM_DB_NAME", Some("app")),
                ("TABULARIUM_DB_PORT", Some("not-a-port")),
            ],
            || {
                let err = EnvSettings::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::InvalidEnv(..)), "got {err:?}");
            },
        );
    }
}
