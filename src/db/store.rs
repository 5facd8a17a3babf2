//! The statement layer of the archive loop.
//!
//! [`ArchiveStore`] is the seam between the engine's state machine and the
//! database: one method per statement shape the loop issues. [`PgArchiveStore`]
//! is the production implementation over the invocation's single connection.
//!
//! Identifiers reaching this module have passed config validation and are
//! double-quoted when spliced into statement text; the predicate is spliced
//! verbatim (it is the one configuration field allowed to carry SQL), and
//! every value (batch limit, correlation keys) is bound as a parameter.

use async_trait::async_trait;
use sqlx::{PgConnection, Row};

use super::{DbError, DbResult};
use crate::config::TableArchiveSpec;

#[async_trait]
pub trait ArchiveStore: Send {
    /// Create `<table>_archived` if it does not exist yet.
    ///
    /// Returns whether this call created it. Safe to call on every
    /// invocation; a pre-existing archive table is left untouched.
    async fn ensure_archive_table(&mut self, spec: &TableArchiveSpec) -> DbResult<bool>;

    /// Number of rows currently satisfying the spec's predicate.
    async fn count_eligible(&mut self, spec: &TableArchiveSpec) -> DbResult<i64>;

    /// Copy up to `batch_size` eligible rows into the archive table,
    /// returning the correlation key of each copied row rendered as text.
    ///
    /// Which eligible rows are chosen first is storage-engine scan order and
    /// not deterministic.
    async fn copy_batch(&mut self, spec: &TableArchiveSpec) -> DbResult<Vec<String>>;

    /// Delete from the source table exactly the rows whose correlation key
    /// is in `keys`. Returns the number of rows deleted.
    async fn delete_batch(&mut self, spec: &TableArchiveSpec, keys: &[String]) -> DbResult<u64>;
}

/// Production store over the invocation's single PostgreSQL session.
///
/// Statements commit individually; the copy and the delete of one batch are
/// two separate commits, so a crash between them leaves the batch in both
/// tables until the next invocation deletes it from the source.
pub struct PgArchiveStore {
    conn: PgConnection,
}

impl PgArchiveStore {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }

    /// Give the underlying connection back, e.g. to inspect state in tests.
    #[cfg(test)]
    pub fn into_inner(self) -> PgConnection {
        self.conn
    }
}

#[async_trait]
impl ArchiveStore for PgArchiveStore {
    async fn ensure_archive_table(&mut self, spec: &TableArchiveSpec) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(spec.archive_table())
        .fetch_one(&mut self.conn)
        .await
        .map_err(DbError::Statement)?;

        if exists {
            return Ok(false);
        }

        let sql = create_archive_table_sql(spec);
        sqlx::query(&sql)
            .execute(&mut self.conn)
            .await
            .map_err(DbError::Statement)?;

        Ok(true)
    }

    async fn count_eligible(&mut self, spec: &TableArchiveSpec) -> DbResult<i64> {
        let sql = count_eligible_sql(spec);
        sqlx::query_scalar(&sql)
            .fetch_one(&mut self.conn)
            .await
            .map_err(DbError::Statement)
    }

    async fn copy_batch(&mut self, spec: &TableArchiveSpec) -> DbResult<Vec<String>> {
        let sql = copy_batch_sql(spec);
        let rows = sqlx::query(&sql)
            .bind(spec.batch_size)
            .fetch_all(&mut self.conn)
            .await
            .map_err(DbError::Statement)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(DbError::Statement))
            .collect()
    }

    async fn delete_batch(&mut self, spec: &TableArchiveSpec, keys: &[String]) -> DbResult<u64> {
        let sql = delete_batch_sql(spec);
        let result = sqlx::query(&sql)
            .bind(keys)
            .execute(&mut self.conn)
            .await
            .map_err(DbError::Statement)?;

        Ok(result.rows_affected())
    }
}

/// Double-quote an identifier that already passed config validation.
fn quote_ident(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// Structural clone: same columns and column types. Indexes and constraints
/// are not copied.
fn create_archive_table_sql(spec: &TableArchiveSpec) -> String {
    format!(
        "CREATE TABLE {archive} (LIKE {table})",
        archive = quote_ident(&spec.archive_table()),
        table = quote_ident(&spec.table),
    )
}

fn count_eligible_sql(spec: &TableArchiveSpec) -> String {
    format!(
        "SELECT COUNT(*) FROM {table} WHERE {predicate}",
        table = quote_ident(&spec.table),
        predicate = spec.predicate,
    )
}

/// The correlation key is cast to text so one statement shape serves every
/// key column type, and so the delete can bind the keys as a text array.
fn copy_batch_sql(spec: &TableArchiveSpec) -> String {
    format!(
        "INSERT INTO {archive} SELECT * FROM {table} WHERE {predicate} LIMIT $1 \
         RETURNING ({key})::text",
        archive = quote_ident(&spec.archive_table()),
        table = quote_ident(&spec.table),
        predicate = spec.predicate,
        key = quote_ident(&spec.key),
    )
}

fn delete_batch_sql(spec: &TableArchiveSpec) -> String {
    format!(
        "DELETE FROM {table} WHERE ({key})::text = ANY($1)",
        table = quote_ident(&spec.table),
        key = quote_ident(&spec.key),
    )
}
