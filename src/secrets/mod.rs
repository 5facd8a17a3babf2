//! Database credential resolution.
//!
//! The username/password pair lives in AWS Secrets Manager; the remaining
//! connection parameters come from the process environment. [`resolve`]
//! merges the two into a single [`Credentials`] value before any table is
//! touched, so a failure here is fatal before the first statement runs.

mod aws;

use std::fmt;

pub use aws::SecretsClient;
use serde::Deserialize;
use thiserror::Error;

use crate::config::EnvSettings;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret {0} is malformed: {1}")]
    Malformed(String, String),

    #[error("Secret store error: {0}")]
    Store(String),
}

pub type SecretResult<T> = Result<T, SecretError>;

/// Connection parameters for the database session.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

/// The JSON document stored in the secret.
#[derive(Debug, Deserialize)]
struct SecretPayload {
    username: String,
    password: String,
}

/// Resolve the full database credentials for this invocation.
pub async fn resolve(settings: &EnvSettings) -> SecretResult<Credentials> {
    tracing::info!(secret = %settings.secret_name, region = %settings.region, "Obtaining database secret");

    let client = SecretsClient::new(&settings.region, settings.secrets_endpoint.as_deref()).await;
    let raw = client.fetch(&settings.secret_name).await?;
    let payload = parse_payload(&settings.secret_name, &raw)?;

    tracing::info!(secret = %settings.secret_name, "Database secret obtained");

    Ok(Credentials {
        username: payload.username,
        password: payload.password,
        host: settings.db_host.clone(),
        port: settings.db_port,
        database: settings.db_name.clone(),
    })
}

fn parse_payload(secret_name: &str, raw: &str) -> SecretResult<SecretPayload> {
    serde_json::from_str(raw)
        .map_err(|e| SecretError::Malformed(secret_name.to_string(), e.to_string()))
}
