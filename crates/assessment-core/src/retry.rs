//! ============================================================================
//! Retry Manager - Background sweeper for pending deliveries
//! ============================================================================
//! Re-attempts each channel's pending envelope:
//! - Once after a settle delay at startup, then on a fixed interval
//! - Envelopes past max age or max attempts are dropped unattempted
//! - Success clears the envelope; failure bumps attempts and records the error
//! - At most one attempt per channel in flight (shared with the orchestrator)
//!
//! The manager never surfaces errors; it only logs.
//! ============================================================================

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::store::ResultStore;
use crate::types::{now_ms, ChannelId};

/// Default delay before the first sweep
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Default interval between sweeps (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Envelopes older than this are dropped (24 hours)
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Envelopes with this many failed attempts are dropped
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Timing and give-up limits for the sweeper
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub settle_delay: Duration,
    pub interval: Duration,
    pub max_age: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            interval: DEFAULT_SWEEP_INTERVAL,
            max_age: DEFAULT_MAX_AGE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    fn max_age_ms(&self) -> i64 {
        i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX)
    }
}

/// What one sweep did for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// No envelope waiting
    Idle,
    /// Another attempt for this channel was already in flight
    Busy,
    /// Envelope outlived the max age and was dropped
    Expired { age_ms: i64, attempts: u32 },
    /// Envelope hit the attempt ceiling and was dropped
    Exhausted { attempts: u32 },
    /// Retry succeeded; envelope cleared
    Delivered { message: String },
    /// Retry failed; envelope kept with the attempt recorded
    AwaitingRetry { attempts: u32, error: String },
}

// ============================================================================
// In-Flight Registry
// ============================================================================

/// Per-channel locks guaranteeing a single attempt in flight per channel
pub struct InFlight {
    locks: HashMap<ChannelId, Arc<AsyncMutex<()>>>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self {
            locks: ChannelId::ALL
                .iter()
                .map(|c| (*c, Arc::new(AsyncMutex::new(()))))
                .collect(),
        }
    }
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the channel is free, then hold it
    pub async fn acquire(&self, channel: ChannelId) -> OwnedMutexGuard<()> {
        self.lock_for(channel).lock_owned().await
    }

    /// Hold the channel only if nothing else is attempting it
    pub fn try_acquire(&self, channel: ChannelId) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(channel).try_lock_owned().ok()
    }

    fn lock_for(&self, channel: ChannelId) -> Arc<AsyncMutex<()>> {
        match self.locks.get(&channel) {
            Some(lock) => Arc::clone(lock),
            // ChannelId::ALL seeds every variant
            None => Arc::new(AsyncMutex::new(())),
        }
    }
}

// ============================================================================
// Sweeper
// ============================================================================

/// State the background task shares with manual sweeps
struct Sweeper {
    store: Arc<ResultStore>,
    channels: Vec<Arc<dyn Channel>>,
    in_flight: Arc<InFlight>,
    policy: RetryPolicy,
}

impl Sweeper {
    async fn sweep(&self) -> Vec<(ChannelId, SweepOutcome)> {
        let attempts = self.channels.iter().map(|channel| async move {
            (channel.id(), self.retry_channel(channel.as_ref()).await)
        });
        let outcomes = join_all(attempts).await;

        let retried = outcomes
            .iter()
            .filter(|(_, o)| !matches!(o, SweepOutcome::Idle | SweepOutcome::Busy))
            .count();
        if retried > 0 {
            info!("Retry sweep handled {} pending submission(s)", retried);
        } else {
            debug!("Retry sweep found nothing to do");
        }
        outcomes
    }

    async fn retry_channel(&self, channel: &dyn Channel) -> SweepOutcome {
        let id = channel.id();
        let Some(_guard) = self.in_flight.try_acquire(id) else {
            debug!("Skipping {} retry: attempt already in flight", id);
            return SweepOutcome::Busy;
        };

        let Some(mut pending) = self.store.load_pending(id) else {
            return SweepOutcome::Idle;
        };

        let age_ms = pending.age_ms(now_ms());
        if age_ms > self.policy.max_age_ms() {
            self.store.clear_pending(id);
            info!(
                "Dropped expired {} submission for result {} after {} attempt(s)",
                id, pending.result.id, pending.attempts
            );
            return SweepOutcome::Expired {
                age_ms,
                attempts: pending.attempts,
            };
        }

        if pending.attempts >= self.policy.max_attempts {
            self.store.clear_pending(id);
            warn!(
                "Giving up on {} submission for result {} after {} attempts",
                id, pending.result.id, pending.attempts
            );
            return SweepOutcome::Exhausted {
                attempts: pending.attempts,
            };
        }

        debug!(
            "Retrying {} submission for result {} (attempt {})",
            id,
            pending.result.id,
            pending.attempts + 1
        );
        let outcome = channel.deliver(&pending.result).await;

        if outcome.success {
            self.store.clear_pending(id);
            info!("Retry delivered result {} via {}", pending.result.id, id);
            SweepOutcome::Delivered {
                message: outcome.message,
            }
        } else {
            pending.record_failure(outcome.message.clone(), now_ms());
            self.store.save_pending(&pending);
            warn!(
                "Retry of {} submission failed (attempt {}): {}",
                id, pending.attempts, outcome.message
            );
            SweepOutcome::AwaitingRetry {
                attempts: pending.attempts,
                error: outcome.message,
            }
        }
    }
}

// ============================================================================
// Retry Manager
// ============================================================================

/// Owns the background sweep task. Construct once at startup and share by
/// reference; dropping it stops the task.
pub struct RetryManager {
    sweeper: Arc<Sweeper>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RetryManager {
    pub fn new(
        store: Arc<ResultStore>,
        channels: Vec<Arc<dyn Channel>>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self::with_policy(store, channels, in_flight, RetryPolicy::default())
    }

    pub fn with_policy(
        store: Arc<ResultStore>,
        channels: Vec<Arc<dyn Channel>>,
        in_flight: Arc<InFlight>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sweeper: Arc::new(Sweeper {
                store,
                channels,
                in_flight,
                policy,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.sweeper.policy
    }

    /// Start the background sweeper: one sweep after the settle delay, then
    /// one per interval. Calling it again while running does nothing.
    /// Must be called from within a tokio runtime.
    pub fn initialize(&self) {
        let Ok(mut task) = self.task.lock() else {
            warn!("Retry manager state poisoned; not starting");
            return;
        };
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Retry manager already running");
            return;
        }

        let sweeper = Arc::clone(&self.sweeper);
        info!(
            "Starting retry manager (settle {:?}, interval {:?})",
            sweeper.policy.settle_delay, sweeper.policy.interval
        );
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(sweeper.policy.settle_delay).await;
            loop {
                sweeper.sweep().await;
                tokio::time::sleep(sweeper.policy.interval).await;
            }
        }));
    }

    /// Stop the background sweeper
    pub fn dispose(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                info!("Retry manager stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Run one sweep now across all channels
    pub async fn sweep(&self) -> Vec<(ChannelId, SweepOutcome)> {
        self.sweeper.sweep().await
    }
}

impl Drop for RetryManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_result, ScriptedChannel};
    use crate::types::PendingSubmission;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn setup(channel: Arc<ScriptedChannel>) -> (Arc<ResultStore>, Arc<InFlight>, RetryManager) {
        let store = Arc::new(ResultStore::in_memory());
        let in_flight = Arc::new(InFlight::new());
        let manager = RetryManager::new(
            Arc::clone(&store),
            vec![channel as Arc<dyn Channel>],
            Arc::clone(&in_flight),
        );
        (store, in_flight, manager)
    }

    fn pending(created_at: i64, attempts: u32) -> PendingSubmission {
        let mut pending = PendingSubmission::new(sample_result(None), ChannelId::Sheet, created_at);
        pending.attempts = attempts;
        pending
    }

    #[tokio::test]
    async fn test_sweep_without_pending_is_idle() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, true));
        let (_store, _in_flight, manager) = setup(Arc::clone(&channel));

        assert_eq!(manager.sweep().await, vec![(ChannelId::Sheet, SweepOutcome::Idle)]);
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_successful_retry_clears_envelope() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, true));
        let (store, _in_flight, manager) = setup(Arc::clone(&channel));
        store.save_pending(&pending(now_ms(), 2));

        let outcomes = manager.sweep().await;
        assert!(matches!(outcomes[0].1, SweepOutcome::Delivered { .. }));
        assert!(store.load_pending(ChannelId::Sheet).is_none());
        assert_eq!(channel.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_retry_records_attempt() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, false));
        let (store, _in_flight, manager) = setup(Arc::clone(&channel));
        store.save_pending(&pending(now_ms(), 0));

        let outcomes = manager.sweep().await;
        assert_eq!(
            outcomes[0].1,
            SweepOutcome::AwaitingRetry {
                attempts: 1,
                error: "sheet sink unavailable".into()
            }
        );

        let kept = store.load_pending(ChannelId::Sheet).unwrap();
        assert_eq!(kept.attempts, 1);
        assert_eq!(kept.last_error.as_deref(), Some("sheet sink unavailable"));
        assert!(kept.last_attempt.is_some());
    }

    #[tokio::test]
    async fn test_expired_envelope_dropped_without_attempt() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, true));
        let (store, _in_flight, manager) = setup(Arc::clone(&channel));
        store.save_pending(&pending(now_ms() - 25 * HOUR_MS, 1));

        let outcomes = manager.sweep().await;
        assert!(matches!(outcomes[0].1, SweepOutcome::Expired { attempts: 1, .. }));
        assert!(store.load_pending(ChannelId::Sheet).is_none());
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_young_envelope_is_retried() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, false));
        let (store, _in_flight, manager) = setup(Arc::clone(&channel));
        store.save_pending(&pending(now_ms() - 23 * HOUR_MS, 4));

        let outcomes = manager.sweep().await;
        assert!(matches!(outcomes[0].1, SweepOutcome::AwaitingRetry { attempts: 5, .. }));
        assert_eq!(channel.calls(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, false));
        let (store, _in_flight, manager) = setup(Arc::clone(&channel));
        store.save_pending(&pending(now_ms(), 0));

        for attempt in 1..=DEFAULT_MAX_ATTEMPTS {
            let outcomes = manager.sweep().await;
            assert!(
                matches!(outcomes[0].1, SweepOutcome::AwaitingRetry { attempts, .. } if attempts == attempt),
                "sweep {} gave {:?}",
                attempt,
                outcomes[0].1
            );
        }

        let outcomes = manager.sweep().await;
        assert_eq!(outcomes[0].1, SweepOutcome::Exhausted { attempts: 5 });
        assert!(store.load_pending(ChannelId::Sheet).is_none());
        assert_eq!(channel.calls(), DEFAULT_MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_busy_channel_is_skipped() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, true));
        let (store, in_flight, manager) = setup(Arc::clone(&channel));
        store.save_pending(&pending(now_ms(), 0));

        let guard = in_flight.acquire(ChannelId::Sheet).await;
        assert_eq!(manager.sweep().await[0].1, SweepOutcome::Busy);
        assert_eq!(channel.calls(), 0);

        drop(guard);
        assert!(matches!(manager.sweep().await[0].1, SweepOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_overlapping_sweeps_attempt_once() {
        let channel = Arc::new(
            ScriptedChannel::new(ChannelId::Sheet, true).with_delay(Duration::from_millis(100)),
        );
        let (store, _in_flight, manager) = setup(Arc::clone(&channel));
        store.save_pending(&pending(now_ms(), 0));

        let (first, second) = tokio::join!(manager.sweep(), manager.sweep());
        let outcomes = [first[0].1.clone(), second[0].1.clone()];
        assert!(outcomes.contains(&SweepOutcome::Busy));
        assert_eq!(channel.calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_sweeps_after_settle_delay() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, true));
        let store = Arc::new(ResultStore::in_memory());
        store.save_pending(&pending(now_ms(), 0));

        let manager = RetryManager::with_policy(
            Arc::clone(&store),
            vec![Arc::clone(&channel) as Arc<dyn Channel>],
            Arc::new(InFlight::new()),
            RetryPolicy {
                settle_delay: Duration::from_millis(20),
                interval: Duration::from_secs(3600),
                ..RetryPolicy::default()
            },
        );

        manager.initialize();
        manager.initialize();
        assert!(manager.is_running());
        assert_eq!(channel.calls(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(channel.calls(), 1);
        assert!(store.load_pending(ChannelId::Sheet).is_none());

        manager.dispose();
        tokio::task::yield_now().await;
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_periodic_sweeps_repeat() {
        let channel = Arc::new(ScriptedChannel::new(ChannelId::Sheet, false));
        let store = Arc::new(ResultStore::in_memory());
        store.save_pending(&pending(now_ms(), 0));

        let manager = RetryManager::with_policy(
            Arc::clone(&store),
            vec![Arc::clone(&channel) as Arc<dyn Channel>],
            Arc::new(InFlight::new()),
            RetryPolicy {
                settle_delay: Duration::ZERO,
                interval: Duration::from_millis(20),
                ..RetryPolicy::default()
            },
        );
        manager.initialize();

        tokio::time::sleep(Duration::from_millis(500)).await;
        manager.dispose();

        // Five failures then the envelope is dropped; no further attempts
        assert_eq!(channel.calls(), DEFAULT_MAX_ATTEMPTS as usize);
        assert!(store.load_pending(ChannelId::Sheet).is_none());
    }
}
