//! Serialized statement execution.
//!
//! A single worker task consumes the dispatch queue in FIFO order and
//! applies one statement at a time against the target, so the source's
//! change ordering is preserved. The worker outlives every per-statement
//! failure: a statement that the target rejects is logged and discarded,
//! and the next one is attempted.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::sql::ReplicationStatement;
use crate::target::SqlExecutor;

/// Consumes [`ReplicationStatement`]s from the dispatch queue and executes
/// them against the target, one transaction per statement.
///
/// The worker stops only when the queue's sender side is closed and every
/// remaining statement has been drained. [`run`](Self::run) hands the
/// executor back so the caller can release the target connection exactly
/// once.
pub struct ExecutionWorker<E> {
    statements: mpsc::Receiver<ReplicationStatement>,
    executor: E,
    last_source_ts: Arc<AtomicI64>,
}

impl<E: SqlExecutor> ExecutionWorker<E> {
    pub fn new(
        statements: mpsc::Receiver<ReplicationStatement>,
        executor: E,
        last_source_ts: Arc<AtomicI64>,
    ) -> Self {
        Self {
            statements,
            executor,
            last_source_ts,
        }
    }

    pub async fn run(mut self) -> E {
        while let Some(statement) = self.statements.recv().await {
            match self.executor.execute(&statement.sql).await {
                Ok(()) => {
                    // Lag is measured against the newest timestamp the loop
                    // has observed, which may be ahead of this statement's
                    // own event. Approximate, liveness-only.
                    let observed = self
                        .last_source_ts
                        .load(Ordering::Relaxed)
                        .max(statement.source_timestamp);
                    let lag_secs = if observed > 0 {
                        (Utc::now().timestamp() - observed).max(0)
                    } else {
                        0
                    };
                    info!(lag_secs, sql = %statement.sql, "Applied statement");
                }
                Err(e) => {
                    error!(error = %e, sql = %statement.sql, "Failed to execute statement");
                }
            }
        }

        debug!("Dispatch queue drained, execution worker stopping");
        self.executor
    }
}
