//! Extraction runtime.
//!
//! The `ExtractRuntime` runs one background task per feed. Each task builds
//! the feed's partitions creator and drives it to completion, with its own
//! metrics and a shutdown signal. All feeds share one reservation manager,
//! so the memory budget is global to the runtime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tributary_core::query::AnsiSelectQueryGenerator;

use crate::checkpoint::CheckpointStore;
use crate::config::{ConnectorConfig, ConnectorState, ExtractConfig};
use crate::connector::{RecordSink, SelectQuerier};
use crate::creator::{ExtractContext, ExtractSummary, PartitionsCreatorFactory};
use crate::error::{ConnectorError, FailureScope};
use crate::feed::Feed;
use crate::metrics::{ExtractMetrics, ExtractMetricsSnapshot};
use crate::partition::JdbcPartitionFactory;

type FeedResult = Result<Option<ExtractSummary>, ConnectorError>;

/// Handle to a running feed.
#[derive(Debug)]
pub struct FeedHandle {
    /// Feed label.
    pub label: String,

    state: Arc<RwLock<ConnectorState>>,

    metrics: Arc<ExtractMetrics>,

    shutdown_tx: Option<oneshot::Sender<()>>,

    task_handle: Option<JoinHandle<FeedResult>>,
}

impl FeedHandle {
    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.state.read()
    }

    /// Returns the feed's metrics.
    #[must_use]
    pub fn metrics(&self) -> &ExtractMetrics {
        &self.metrics
    }

    /// Asks the feed task to stop. A feed that already finished keeps its
    /// final state.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Waits for the feed task to complete.
    ///
    /// Returns `None` for feeds that have no partitions creator.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the task panicked or the feed failed.
    pub async fn join(mut self) -> FeedResult {
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| ConnectorError::Internal(format!("task panicked: {e}")))?
        } else {
            Ok(None)
        }
    }
}

/// Outcome of one feed in [`ExtractRuntime::run_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReport {
    /// Stream summary.
    pub summary: ExtractSummary,
    /// Final metrics of the feed.
    pub metrics: ExtractMetricsSnapshot,
}

/// Outcome of [`ExtractRuntime::run_all`].
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Feeds that completed.
    pub completed: Vec<FeedReport>,
    /// Feeds that failed with a stream-scoped error.
    pub failed: Vec<(String, ConnectorError)>,
    /// Feeds that have no partitions creator.
    pub skipped: Vec<String>,
}

impl SyncReport {
    /// Returns `true` if no feed failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runtime that extracts feeds on background tasks.
pub struct ExtractRuntime {
    creators: Arc<PartitionsCreatorFactory>,
    ctx: ExtractContext,
    feeds: Arc<RwLock<HashMap<String, FeedHandle>>>,
}

impl ExtractRuntime {
    /// Creates a runtime from its parts.
    #[must_use]
    pub fn new(creators: PartitionsCreatorFactory, ctx: ExtractContext) -> Self {
        Self {
            creators: Arc::new(creators),
            ctx,
            feeds: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a runtime over a SQL source with ANSI query generation.
    #[must_use]
    pub fn jdbc(
        querier: Arc<dyn SelectQuerier>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
        config: ExtractConfig,
    ) -> Self {
        let factory = JdbcPartitionFactory::new(
            Arc::clone(&querier),
            Arc::new(AnsiSelectQueryGenerator),
            config.clone(),
        );
        let creators = PartitionsCreatorFactory::new(Arc::new(factory), config.mode);
        Self::new(creators, ExtractContext::new(querier, store, sink, config))
    }

    /// Creates a SQL runtime from raw connector properties.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` for invalid settings.
    pub fn from_config(
        querier: Arc<dyn SelectQuerier>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
        config: &ConnectorConfig,
    ) -> Result<Self, ConnectorError> {
        let config = ExtractConfig::from_config(config)?;
        Ok(Self::jdbc(querier, store, sink, config))
    }

    /// Returns the shared execution context.
    #[must_use]
    pub fn context(&self) -> &ExtractContext {
        &self.ctx
    }

    /// Starts extracting `feed` on a background task.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if a feed with the same
    /// label is already registered.
    pub fn start_feed(&self, feed: Feed) -> Result<String, ConnectorError> {
        let label = feed.label();
        let mut feeds = self.feeds.write();
        if feeds.contains_key(&label) {
            return Err(ConnectorError::ConfigurationError(format!(
                "feed {label} is already running"
            )));
        }

        let state = Arc::new(RwLock::new(ConnectorState::Running));
        let metrics = Arc::new(ExtractMetrics::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task_state = Arc::clone(&state);
        let creators = Arc::clone(&self.creators);
        let ctx = self.ctx.clone().with_metrics(Arc::clone(&metrics));
        let task_label = label.clone();

        let task_handle = tokio::spawn(async move {
            run_feed(task_label, feed, creators, ctx, task_state, shutdown_rx).await
        });

        feeds.insert(
            label.clone(),
            FeedHandle {
                label: label.clone(),
                state,
                metrics,
                shutdown_tx: Some(shutdown_tx),
                task_handle: Some(task_handle),
            },
        );
        Ok(label)
    }

    /// Stops a running feed.
    pub fn stop_feed(&self, label: &str) {
        if let Some(handle) = self.feeds.write().get_mut(label) {
            handle.shutdown();
        }
    }

    /// Removes a feed and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` for unknown feeds, or the
    /// feed's own error.
    pub async fn join_feed(&self, label: &str) -> FeedResult {
        let handle = self.feeds.write().remove(label).ok_or_else(|| {
            ConnectorError::ConfigurationError(format!("unknown feed {label}"))
        })?;
        handle.join().await
    }

    /// Returns the state of a feed.
    #[must_use]
    pub fn feed_state(&self, label: &str) -> Option<ConnectorState> {
        self.feeds.read().get(label).map(FeedHandle::state)
    }

    /// Returns a snapshot of a feed's metrics.
    #[must_use]
    pub fn feed_metrics(&self, label: &str) -> Option<ExtractMetricsSnapshot> {
        self.feeds.read().get(label).map(|h| h.metrics().snapshot())
    }

    /// Returns the number of registered feeds.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    /// Runs every feed concurrently and waits for all of them.
    ///
    /// Global feeds are reported as skipped without starting a task.
    /// Stream-scoped failures are collected in the report. A sync-scoped
    /// failure stops every feed and is returned as the error.
    ///
    /// # Errors
    ///
    /// Returns the first sync-scoped error.
    pub async fn run_all(&self, feeds: Vec<Feed>) -> Result<SyncReport, ConnectorError> {
        let mut report = SyncReport::default();
        let (global, streams): (Vec<_>, Vec<_>) = feeds.into_iter().partition(Feed::is_global);
        for feed in global {
            let label = feed.label();
            info!(feed = %label, "global feed has no partitions creator, skipping");
            report.skipped.push(label);
        }

        let labels = streams
            .into_iter()
            .map(|feed| self.start_feed(feed))
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|_| self.shutdown_all())?;

        for label in labels {
            let Some(handle) = self.feeds.write().remove(&label) else {
                continue;
            };
            let metrics = Arc::clone(&handle.metrics);
            match handle.join().await {
                Ok(Some(summary)) => report.completed.push(FeedReport {
                    summary,
                    metrics: metrics.snapshot(),
                }),
                Ok(None) => report.skipped.push(label),
                Err(e) if e.scope() == FailureScope::Sync => {
                    self.shutdown_all();
                    return Err(e);
                }
                Err(e) => report.failed.push((label, e)),
            }
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "sync finished"
        );
        Ok(report)
    }

    /// Stops all running feeds.
    pub fn shutdown_all(&self) {
        for handle in self.feeds.write().values_mut() {
            handle.shutdown();
        }
    }
}

impl std::fmt::Debug for ExtractRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractRuntime")
            .field("feeds", &self.feed_count())
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

async fn run_feed(
    label: String,
    feed: Feed,
    creators: Arc<PartitionsCreatorFactory>,
    ctx: ExtractContext,
    state: Arc<RwLock<ConnectorState>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> FeedResult {
    let work = async {
        let Some(creator) = creators.make(&feed).await? else {
            info!(feed = %label, "feed has no partitions creator, skipping");
            return Ok(None);
        };
        creator.run(&ctx).await.map(Some)
    };

    let outcome = tokio::select! {
        _ = &mut shutdown_rx => Err(ConnectorError::Cancelled),
        result = work => result,
    };

    *state.write() = match &outcome {
        Ok(_) => ConnectorState::Completed,
        Err(ConnectorError::Cancelled) => ConnectorState::Cancelled,
        Err(_) => ConnectorState::Failed,
    };
    match &outcome {
        Ok(Some(summary)) => info!(
            feed = %label,
            partitions = summary.partitions,
            records = summary.records,
            "feed completed"
        ),
        Ok(None) => {}
        Err(ConnectorError::Cancelled) => info!(feed = %label, "feed cancelled"),
        Err(e) => error!(feed = %label, error = %e, "feed failed"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::feed::StreamId;
    use crate::testing::{MemoryTable, RecordingSink};
    use std::time::Duration;

    fn runtime(table: &Arc<MemoryTable>) -> ExtractRuntime {
        ExtractRuntime::jdbc(
            Arc::clone(table) as Arc<dyn SelectQuerier>,
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(RecordingSink::new()),
            ExtractConfig {
                split_count: 2,
                ..ExtractConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_start_and_join_feed() {
        let table = Arc::new(MemoryTable::items(6));
        let runtime = runtime(&table);

        let label = runtime
            .start_feed(Feed::Stream(table.full_refresh_feed()))
            .unwrap();
        assert_eq!(label, "public.items");
        assert_eq!(runtime.feed_count(), 1);

        let summary = runtime.join_feed(&label).await.unwrap().unwrap();
        assert_eq!(summary.records, 6);
        assert_eq!(runtime.feed_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_feed_rejected() {
        let table = Arc::new(MemoryTable::items(2).with_delay(Duration::from_millis(20)));
        let runtime = runtime(&table);
        runtime
            .start_feed(Feed::Stream(table.full_refresh_feed()))
            .unwrap();

        let err = runtime
            .start_feed(Feed::Stream(table.full_refresh_feed()))
            .unwrap_err();
        assert_eq!(err.scope(), FailureScope::Sync);
        runtime.join_feed("public.items").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_feed_cancels() {
        let table = Arc::new(MemoryTable::items(4).with_delay(Duration::from_secs(30)));
        let runtime = runtime(&table);
        let label = runtime
            .start_feed(Feed::Stream(table.full_refresh_feed()))
            .unwrap();
        assert_eq!(runtime.feed_state(&label), Some(ConnectorState::Running));

        runtime.stop_feed(&label);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.feed_state(&label), Some(ConnectorState::Cancelled));

        let err = runtime.join_feed(&label).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Cancelled));
    }

    #[tokio::test]
    async fn test_unknown_feed() {
        let table = Arc::new(MemoryTable::items(1));
        let runtime = runtime(&table);
        assert!(runtime.feed_state("nope").is_none());
        assert!(runtime.join_feed("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_run_all_skips_every_global_feed() {
        let table = Arc::new(MemoryTable::items(3));
        let runtime = runtime(&table);
        let report = runtime
            .run_all(vec![
                Feed::Global {
                    streams: vec![StreamId::new(None, "a")],
                },
                Feed::Global {
                    streams: vec![StreamId::new(None, "b")],
                },
                Feed::Stream(table.full_refresh_feed()),
            ])
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["global[a]", "global[b]"]);
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].summary.records, 3);
        assert!(report.is_success());
    }

    #[test]
    fn test_from_config_rejects_bad_settings() {
        let table = Arc::new(MemoryTable::items(1));
        let mut config = ConnectorConfig::new();
        config.set(crate::config::MAX_CONCURRENCY, "0");
        let err = ExtractRuntime::from_config(
            table as Arc<dyn SelectQuerier>,
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(RecordingSink::new()),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.scope(), FailureScope::Sync);
    }
}
