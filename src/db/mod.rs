//! Database session and the statement layer of the archive loop.

mod store;


use sqlx::{ConnectOptions, PgConnection, postgres::PgConnectOptions};
pub use store::{ArchiveStore, PgArchiveStore};
use thiserror::Error;

use crate::secrets::Credentials;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to establish database session: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Database statement failed: {0}")]
    Statement(#[source] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Open the single database session used for the whole invocation.
///
/// One live connection, no pool: every statement of every table runs on it
/// sequentially, committed individually (autocommit).
pub async fn connect(credentials: &Credentials) -> DbResult<PgConnection> {
    let options = PgConnectOptions::new()
        .host(&credentials.host)
        .port(credentials.port)
        .username(&credentials.username)
        .password(&credentials.password)
        .database(&credentials.database);

    let conn = options.connect().await.map_err(DbError::Connection)?;

    tracing::info!(
        host = %credentials.host,
        database = %credentials.database,
        "Database session established"
    );

    Ok(conn)
}
