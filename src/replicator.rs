//! The replication loop and its lifecycle.
//!
//! One task drives the binlog source and feeds the dispatch queue; the
//! execution worker consumes it. The loop checkpoints the binlog position
//! after every consumed event, before downstream execution completes, so
//! a restart re-applies the queued tail rather than losing it
//! (at-least-once delivery).
//!
//! Lifecycle: starting (load position, connect, spawn worker, open
//! stream) → streaming → draining on interrupt or stream end (stop
//! intake, let the worker finish, bounded wait) or terminating on SIGTERM
//! (stop immediately, queued statements are dropped). Every trigger funnels
//! into the same shutdown routine, which runs exactly once.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::binlog::{BinlogSource, SourcedEvent};
use crate::checkpoint::{BinlogPosition, CheckpointManager};
use crate::sql::{self, ReplicationStatement};
use crate::target::MysqlTarget;
use crate::worker::ExecutionWorker;
use crate::{Config, Error, Result};

enum StopReason {
    /// Interrupt or stream end: stop intake, drain the queue.
    Drain,
    /// Termination signal: stop without waiting for the queue.
    Terminate,
}

enum Step {
    Continue,
    Stop(StopReason),
    SourceLost,
}

/// Per-event stage of the replication loop: translate the event, hand its
/// statements to the dispatch queue, then persist the position.
///
/// Split out from [`Replicator`] so the event path can be exercised
/// without a live binlog stream.
pub struct EventPipeline {
    queue: mpsc::Sender<ReplicationStatement>,
    checkpoints: CheckpointManager,
    last_source_ts: Arc<AtomicI64>,
    position: BinlogPosition,
}

impl EventPipeline {
    pub fn new(
        queue: mpsc::Sender<ReplicationStatement>,
        checkpoints: CheckpointManager,
        last_source_ts: Arc<AtomicI64>,
        position: BinlogPosition,
    ) -> Self {
        Self {
            queue,
            checkpoints,
            last_source_ts,
            position,
        }
    }

    pub fn position(&self) -> &BinlogPosition {
        &self.position
    }

    /// Consumes one sourced event: translate, enqueue, checkpoint.
    ///
    /// A row that fails to encode is logged and skipped; the rest of the
    /// event still replicates. The position advances and persists
    /// unconditionally: the event is consumed either way.
    pub async fn process(&mut self, sourced: SourcedEvent) {
        self.last_source_ts
            .store(sourced.event.timestamp(), Ordering::Relaxed);

        for built in sql::build(&sourced.event) {
            match built {
                Ok(statement) => {
                    info!(sql = %statement.sql, "Translated statement");
                    if self.queue.send(statement).await.is_err() {
                        warn!("Dispatch queue is closed, dropping statement");
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to build statement for row");
                }
            }
        }

        self.advance(sourced.position).await;
    }

    /// Marks an event as consumed without generating statements and
    /// persists the new position. Used for events that could not be
    /// decoded; refusing to advance would wedge replication on the same
    /// record forever.
    pub async fn advance(&mut self, position: BinlogPosition) {
        self.position = position;
        if let Err(e) = self.checkpoints.save(&self.position).await {
            // Reported but not fatal: a crash before the next successful
            // save replays a larger backlog, which at-least-once absorbs.
            error!(error = %e, "Failed to persist binlog position");
        }
    }

    fn into_parts(
        self,
    ) -> (
        mpsc::Sender<ReplicationStatement>,
        CheckpointManager,
        BinlogPosition,
    ) {
        (self.queue, self.checkpoints, self.position)
    }
}

/// Drives replication from the source binlog to the target database.
pub struct Replicator {
    config: Config,
}

impl Replicator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&mut self) -> Result<()> {
        let checkpoints = CheckpointManager::new(&self.config.replication.checkpoint_file);
        let start = checkpoints.load(self.config.initial_position()).await;
        info!(position = %start, "Starting replication");

        let target = MysqlTarget::connect(&self.config.target_mysql_settings).await?;

        let (queue, statements) = mpsc::channel(self.config.replication.max_queue_size);
        let last_source_ts = Arc::new(AtomicI64::new(0));
        let worker = ExecutionWorker::new(statements, target, Arc::clone(&last_source_ts));
        let worker_handle = tokio::spawn(worker.run());

        let mut pipeline = EventPipeline::new(queue, checkpoints, last_source_ts, start.clone());

        let mut source = Some(
            BinlogSource::connect(
                &self.config.source_mysql_settings,
                self.config.source_server_id,
                start,
            )
            .await?,
        );

        let mut sigterm = signal(SignalKind::terminate())?;

        let reason = loop {
            let step = match source.as_mut() {
                Some(stream) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Interrupt received, draining");
                            Step::Stop(StopReason::Drain)
                        }
                        _ = sigterm.recv() => {
                            info!("Termination signal received");
                            Step::Stop(StopReason::Terminate)
                        }
                        next = stream.next_event() => match next {
                            Ok(Some(sourced)) => {
                                pipeline.process(sourced).await;
                                Step::Continue
                            }
                            Ok(None) => {
                                info!("Binlog stream ended");
                                Step::Stop(StopReason::Drain)
                            }
                            Err(Error::Decoding { message }) => {
                                warn!(error = %message, "Skipping undecodable event");
                                let position = stream.position().clone();
                                pipeline.advance(position).await;
                                Step::Continue
                            }
                            Err(e) => {
                                error!(error = %e, "Source stream failure, will reconnect");
                                Step::SourceLost
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Interrupt received while reconnecting");
                            Step::Stop(StopReason::Drain)
                        }
                        _ = sigterm.recv() => {
                            info!("Termination signal received while reconnecting");
                            Step::Stop(StopReason::Terminate)
                        }
                        reopened = BinlogSource::reconnect(
                            &self.config.source_mysql_settings,
                            self.config.source_server_id,
                            pipeline.position().clone(),
                            self.config.replication.source_retry_interval(),
                        ) => {
                            source = Some(reopened);
                            Step::Continue
                        }
                    }
                }
            };

            match step {
                Step::Continue => {}
                Step::Stop(reason) => break reason,
                Step::SourceLost => source = None,
            }
        };

        self.shutdown(reason, pipeline, source, worker_handle).await
    }

    /// The single shutdown path, reached from every trigger.
    ///
    /// Saves the final position, closes intake, then either waits for the
    /// worker to drain the queue (bounded) or aborts it outright. Both
    /// connections are released exactly once.
    async fn shutdown(
        &self,
        reason: StopReason,
        pipeline: EventPipeline,
        source: Option<BinlogSource>,
        mut worker: JoinHandle<MysqlTarget>,
    ) -> Result<()> {
        let (queue, checkpoints, position) = pipeline.into_parts();

        if let Err(e) = checkpoints.save(&position).await {
            error!(error = %e, "Failed to save final position");
        } else {
            info!(position = %position, "Saved final position");
        }

        // Closing the sender is the worker's stop signal: it drains what
        // is queued and returns.
        drop(queue);

        if let Some(source) = source {
            if let Err(e) = source.close().await {
                warn!(error = %e, "Source connection did not close cleanly");
            }
        }

        match reason {
            StopReason::Drain => {
                match timeout(self.config.replication.drain_timeout(), &mut worker).await {
                    Ok(Ok(target)) => {
                        if let Err(e) = target.disconnect().await {
                            warn!(error = %e, "Target connection did not close cleanly");
                        }
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "Execution worker failed");
                    }
                    Err(_) => {
                        warn!("Drain timed out, statements still queued were not applied");
                        worker.abort();
                    }
                }
            }
            StopReason::Terminate => {
                // Deliberately lossy: whatever is still queued is dropped
                // here and re-applied from the saved position on restart.
                worker.abort();
            }
        }

        info!("Replication stopped");
        Ok(())
    }
}
