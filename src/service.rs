//! Intake loop: the long-running part of `start`.
//!
//! Pulls inbound posts from the feed channel and completed albums from the
//! aggregator, and runs each unit of work as its own Tokio task so a slow
//! upload never blocks intake. A failing unit is logged and counted; it
//! never stops the loop.
//!
//! Shutdown order: stop intake, flush pending albums, drain what the
//! flush produced, wait (bounded) for in-flight units, release the sink.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::routing::album::CompletedAlbum;
use crate::routing::pipeline::{ForwardingPipeline, Intake, UnitOutcome};
use crate::routing::{ForwardError, InboundMessage};

/// Default bound on waiting for in-flight units at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

type UnitResult = Result<UnitOutcome, ForwardError>;

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Units that finished without error (delivered, skipped or dropped).
    pub completed: usize,
    /// Units that ended with an error or panicked.
    pub failed: usize,
    /// Units still running when the shutdown timeout expired.
    pub abandoned: usize,
}

impl ServiceStats {
    fn record(&mut self, joined: Result<UnitResult, JoinError>) {
        match joined {
            Ok(Ok(outcome)) => {
                debug!(?outcome, "unit finished");
                self.completed = self.completed.saturating_add(1);
            }
            Ok(Err(e)) => {
                error!(error = %e, "unit failed");
                self.failed = self.failed.saturating_add(1);
            }
            Err(e) => {
                error!(error = %e, "unit task panicked or was cancelled");
                self.failed = self.failed.saturating_add(1);
            }
        }
    }
}

/// The running relay.
pub struct Service {
    pipeline: Arc<ForwardingPipeline>,
    albums: mpsc::UnboundedReceiver<CompletedAlbum>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("pipeline", &self.pipeline)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Service over `pipeline`, receiving completed albums from the
    /// pipeline's aggregator on `albums`.
    pub fn new(
        pipeline: ForwardingPipeline,
        albums: mpsc::UnboundedReceiver<CompletedAlbum>,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            albums,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Override how long shutdown waits for in-flight units.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Run until `shutdown` resolves or the feed channel closes, then shut
    /// down gracefully.
    pub async fn run<F>(self, mut inbound: mpsc::Receiver<InboundMessage>, shutdown: F) -> ServiceStats
    where
        F: Future<Output = ()>,
    {
        let Self {
            pipeline,
            mut albums,
            shutdown_timeout,
        } = self;
        let mut tasks: JoinSet<UnitResult> = JoinSet::new();
        let mut stats = ServiceStats::default();
        tokio::pin!(shutdown);

        info!("relay ready, listening for posts");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("received shutdown signal, initiating graceful shutdown");
                    break;
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!("feed channel closed");
                        break;
                    };
                    if let Intake::Immediate(message) = pipeline.intake(message) {
                        spawn_single(&mut tasks, &pipeline, message);
                    }
                }
                Some(album) = albums.recv() => {
                    spawn_album(&mut tasks, &pipeline, album);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    stats.record(joined);
                }
            }
        }

        // Stop accepting posts; anything the feed still delivers is dropped.
        drop(inbound);

        let flushed = pipeline.flush_albums();
        if flushed > 0 {
            info!(albums = flushed, "flushed pending albums");
        }
        while let Ok(album) = albums.try_recv() {
            spawn_album(&mut tasks, &pipeline, album);
        }

        let pending = tasks.len();
        if pending > 0 {
            info!(
                pending_units = pending,
                timeout_secs = shutdown_timeout.as_secs(),
                "waiting for in-flight units"
            );
        }
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                stats.record(joined);
            }
        })
        .await;
        if drained.is_err() {
            stats.abandoned = tasks.len();
            warn!(
                remaining_units = stats.abandoned,
                "shutdown timeout exceeded, abandoning in-flight units"
            );
            tasks.abort_all();
        }

        drop(pipeline);
        info!(
            completed = stats.completed,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "relay shut down"
        );
        stats
    }
}

fn spawn_single(
    tasks: &mut JoinSet<UnitResult>,
    pipeline: &Arc<ForwardingPipeline>,
    message: InboundMessage,
) {
    let pipeline = Arc::clone(pipeline);
    tasks.spawn(async move { pipeline.process_single(&message).await });
}

fn spawn_album(
    tasks: &mut JoinSet<UnitResult>,
    pipeline: &Arc<ForwardingPipeline>,
    album: CompletedAlbum,
) {
    let pipeline = Arc::clone(pipeline);
    tasks.spawn(async move { pipeline.process_album(album).await });
}
