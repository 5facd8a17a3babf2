//! The archive-and-purge engine.
//!
//! For each configured table the engine drives a bounded loop:
//!
//! ```text
//! ensure the archive table exists
//! while rows match the predicate:
//!     copy one batch into the archive table     (commit)
//!     delete the copied rows from the source    (commit)
//! ```
//!
//! The copy and the delete are separate commits. A crash between them leaves
//! the batch in both tables, and the next invocation re-copies it before the
//! delete drains the source: migration is at-least-once, not exactly-once.
//! Callers needing exactly-once must deduplicate the archive table
//! downstream.
//!
//! Tables are processed strictly in configuration order, one batch cycle at
//! a time. Any database error aborts the whole invocation; batches already
//! committed stand.


use thiserror::Error;

use crate::{
    config::TableArchiveSpec,
    db::{ArchiveStore, DbError},
};

/// Operational knobs for one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Report eligible row counts without creating tables or moving rows.
    pub dry_run: bool,

    /// Abort if one table needs more than this many copy+delete cycles.
    /// 0 disables the guard.
    ///
    /// The loop only terminates if the predicate stops matching rows once
    /// they are moved; that property cannot be checked generically, so this
    /// bound is the operator's circuit breaker against a predicate that does
    /// not shrink.
    pub max_batches: u32,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("While archiving table {table}: {source}")]
    Db {
        table: String,
        #[source]
        source: DbError,
    },

    #[error(
        "Table {table} still had eligible rows after {limit} batches; \
         the predicate does not appear to shrink as rows are archived"
    )]
    BatchLimit { table: String, limit: u32 },
}

/// What happened to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRunSummary {
    pub table: String,
    pub archive_table: String,
    /// Whether this invocation created the archive table.
    pub archive_created: bool,
    /// Completed copy+delete cycles.
    pub batches: u32,
    pub rows_copied: u64,
    pub rows_deleted: u64,
}

/// Terminal result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status_code: u16,
    pub message: String,
    pub tables: Vec<TableRunSummary>,
}

impl RunReport {
    fn success(tables: Vec<TableRunSummary>) -> Self {
        Self {
            status_code: 200,
            message: "DB tables rotated successfully".to_string(),
            tables,
        }
    }

    /// Total rows moved to archive tables across the whole invocation.
    pub fn total_rows_copied(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_copied).sum()
    }
}

/// One progress event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    TableStarted { table: String },
    ArchiveTableCreated { archive_table: String },
    EligibleCounted { table: String, eligible: i64 },
    BatchCopied { table: String, rows: u64 },
    BatchDeleted { table: String, rows: u64 },
    TableFinished { summary: TableRunSummary },
    DryRun { table: String, eligible: i64 },
}

/// Where engine progress goes.
///
/// Injected rather than logged directly so tests can assert on the exact
/// event sequence.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Forwards engine events to the process-wide `tracing` subscriber.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: RunEvent) {
        match event {
            RunEvent::TableStarted { table } => {
                tracing::info!(table = %table, "Archiving table");
            }
            RunEvent::ArchiveTableCreated { archive_table } => {
                tracing::info!(table = %archive_table, "Created archive table");
            }
            RunEvent::EligibleCounted { table, eligible } => {
                tracing::debug!(table = %table, eligible, "Counted eligible rows");
            }
            RunEvent::BatchCopied { table, rows } => {
                tracing::info!(table = %table, rows, "Copied batch to archive table");
            }
            RunEvent::BatchDeleted { table, rows } => {
                tracing::info!(table = %table, rows, "Deleted batch from source table");
            }
            RunEvent::TableFinished { summary } => {
                tracing::info!(
                    table = %summary.table,
                    archive_table = %summary.archive_table,
                    archive_created = summary.archive_created,
                    batches = summary.batches,
                    rows_copied = summary.rows_copied,
                    rows_deleted = summary.rows_deleted,
                    "Table archived"
                );
            }
            RunEvent::DryRun { table, eligible } => {
                tracing::info!(table = %table, eligible, "DRY RUN: would archive eligible rows");
            }
        }
    }
}

/// Archive every configured table, strictly in order.
///
/// All of one table's batches commit before any statement for the next table
/// is issued.
pub async fn run(
    store: &mut dyn ArchiveStore,
    sink: &dyn EventSink,
    specs: &[TableArchiveSpec],
    options: &RunOptions,
) -> Result<RunReport, EngineError> {
    let mut summaries = Vec::with_capacity(specs.len());

    for spec in specs {
        summaries.push(run_table(store, sink, spec, options).await?);
    }

    Ok(RunReport::success(summaries))
}

/// Migrate all currently-eligible rows of one table, in bounded batches.
async fn run_table(
    store: &mut dyn ArchiveStore,
    sink: &dyn EventSink,
    spec: &TableArchiveSpec,
    options: &RunOptions,
) -> Result<TableRunSummary, EngineError> {
    sink.emit(RunEvent::TableStarted {
        table: spec.table.clone(),
    });

    let mut summary = TableRunSummary {
        table: spec.table.clone(),
        archive_table: spec.archive_table(),
        ..Default::default()
    };

    if options.dry_run {
        let eligible = store
            .count_eligible(spec)
            .await
            .map_err(statement_failed(&spec.table))?;
        sink.emit(RunEvent::DryRun {
            table: spec.table.clone(),
            eligible,
        });
        return Ok(summary);
    }

    summary.archive_created = store
        .ensure_archive_table(spec)
        .await
        .map_err(statement_failed(&spec.table))?;
    if summary.archive_created {
        sink.emit(RunEvent::ArchiveTableCreated {
            archive_table: spec.archive_table(),
        });
    }

    loop {
        // A fresh count after every delete, never a locally decremented
        // counter: concurrent writers can change what is eligible.
        let eligible = store
            .count_eligible(spec)
            .await
            .map_err(statement_failed(&spec.table))?;
        sink.emit(RunEvent::EligibleCounted {
            table: spec.table.clone(),
            eligible,
        });
        if eligible == 0 {
            break;
        }

        if options.max_batches > 0 && summary.batches >= options.max_batches {
            return Err(EngineError::BatchLimit {
                table: spec.table.clone(),
                limit: options.max_batches,
            });
        }

        let keys = store
            .copy_batch(spec)
            .await
            .map_err(statement_failed(&spec.table))?;
        sink.emit(RunEvent::BatchCopied {
            table: spec.table.clone(),
            rows: keys.len() as u64,
        });
        if keys.is_empty() {
            break;
        }

        let deleted = store
            .delete_batch(spec, &keys)
            .await
            .map_err(statement_failed(&spec.table))?;
        sink.emit(RunEvent::BatchDeleted {
            table: spec.table.clone(),
            rows: deleted,
        });

        summary.batches += 1;
        summary.rows_copied += keys.len() as u64;
        summary.rows_deleted += deleted;
    }

    sink.emit(RunEvent::TableFinished {
        summary: summary.clone(),
    });

    Ok(summary)
}

fn statement_failed(table: &str) -> impl FnOnce(DbError) -> EngineError + '_ {
    move |source| EngineError::Db {
        table: table.to_string(),
        source,
    }
}
