//! ============================================================================
//! Submission Pipeline - Score, persist, then fan out to channels
//! ============================================================================
//! `submit_result` is the single entry point for a finished assessment:
//! 1. Score the answers
//! 2. Persist the result locally before any network I/O
//! 3. Return to the caller immediately
//! 4. Deliver to every channel concurrently in the background
//!
//! Each channel writes its pending envelope before attempting, so a crash
//! mid-attempt still leaves something for the retry manager.
//! ============================================================================

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::AssessmentConfig;
use crate::retry::{InFlight, RetryManager};
use crate::scorer;
use crate::store::{ResultStore, StoreError};
use crate::types::{now_ms, Answer, ChannelId, DeliveryOutcome, PendingSubmission, ScoreResult, UserInfo};

/// Result of the initial delivery attempt on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel: ChannelId,
    pub outcome: DeliveryOutcome,
}

/// A submitted result plus its in-progress deliveries.
/// Dropping it leaves the deliveries running.
pub struct Submission {
    pub result: ScoreResult,
    handle: JoinHandle<Vec<ChannelReport>>,
}

impl Submission {
    /// Wait for every channel's first attempt to resolve
    pub async fn wait(self) -> Vec<ChannelReport> {
        match self.handle.await {
            Ok(reports) => reports,
            Err(e) => {
                warn!("Delivery task for result {} ended early: {}", self.result.id, e);
                Vec::new()
            }
        }
    }
}

/// Ties scorer, store and channels together
pub struct SubmissionOrchestrator {
    store: Arc<ResultStore>,
    channels: Vec<Arc<dyn Channel>>,
    in_flight: Arc<InFlight>,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<ResultStore>,
        channels: Vec<Arc<dyn Channel>>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            store,
            channels,
            in_flight,
        }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| c.id()).collect()
    }

    /// Resolve the subject's identity for this install and remember what
    /// they supplied. Blank values are ignored.
    pub fn identity(&self, full_name: Option<&str>, email: Option<&str>) -> UserInfo {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

        let mut info = self.store.load_user_info().unwrap_or_default();
        info.user_id = self.store.user_id();
        if let Some(name) = clean(full_name) {
            info.first_name = None;
            info.full_name = Some(name);
        }
        if let Some(email) = clean(email) {
            info.email = Some(email);
        }
        info.first_name = info.resolved_first_name();

        self.store.save_user_info(&info);
        info
    }

    /// Score, persist, and start delivery. Returns once the result is
    /// stored; deliveries continue in the background.
    /// Must be called from within a tokio runtime.
    pub fn submit_result(&self, answers: &[Answer], identity: &UserInfo) -> Submission {
        let result = scorer::score(answers).into_result(identity);
        self.store.save_result(&result);
        info!(
            "Submitted result {} (dominant {}, secondary {})",
            result.id, result.dominant_gift, result.secondary_gift
        );

        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let channels = self.channels.clone();
        let delivered = result.clone();

        let handle = tokio::spawn(async move {
            let attempts = channels.iter().map(|channel| {
                deliver_to(&store, &in_flight, channel.as_ref(), &delivered)
            });
            join_all(attempts).await
        });

        Submission { result, handle }
    }
}

/// First attempt on one channel, bracketed by the pending envelope
async fn deliver_to(
    store: &ResultStore,
    in_flight: &InFlight,
    channel: &dyn Channel,
    result: &ScoreResult,
) -> ChannelReport {
    let id = channel.id();
    let _guard = in_flight.acquire(id).await;

    let mut pending = PendingSubmission::new(result.clone(), id, now_ms());
    store.save_pending(&pending);

    let outcome = channel.deliver(result).await;
    if outcome.success {
        store.clear_pending(id);
        debug!("{} accepted result {}: {}", id, result.id, outcome.message);
    } else {
        pending.record_failure(outcome.message.clone(), now_ms());
        store.save_pending(&pending);
        warn!(
            "{} delivery of result {} failed, queued for retry: {}",
            id, result.id, outcome.message
        );
    }

    ChannelReport {
        channel: id,
        outcome,
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Store, orchestrator and retry manager wired over one set of channels
pub struct Pipeline {
    pub orchestrator: SubmissionOrchestrator,
    pub retry: RetryManager,
}

impl Pipeline {
    pub fn new(store: Arc<ResultStore>, channels: Vec<Arc<dyn Channel>>, config: &AssessmentConfig) -> Self {
        let in_flight = Arc::new(InFlight::new());
        let retry = RetryManager::with_policy(
            Arc::clone(&store),
            channels.clone(),
            Arc::clone(&in_flight),
            config.retry.clone(),
        );
        Self {
            orchestrator: SubmissionOrchestrator::new(store, channels, in_flight),
            retry,
        }
    }

    /// Open the configured store and build the configured channels
    pub fn from_config(config: &AssessmentConfig) -> Result<Self, StoreError> {
        let store = Arc::new(ResultStore::open(config.db_path.as_deref())?);
        Ok(Self::new(store, config.build_channels(), config))
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        self.orchestrator.store()
    }

    /// Retry whatever is still pending, then submit. Used by short-lived
    /// processes that never start the background sweeper.
    pub async fn submit(&self, answers: &[Answer], identity: &UserInfo) -> Submission {
        let swept = self.retry.sweep().await;
        debug!("Pre-submit sweep: {:?}", swept);
        self.orchestrator.submit_result(answers, identity)
    }
}
