//! ============================================================================
//! Channel Module - Best-effort delivery of results to external sinks
//! ============================================================================
//! Every sink sits behind the same [`Channel`] interface:
//! - SheetChannel: spreadsheet logging web hook (form post)
//! - EmailChannel: transactional email via the EmailJS REST API
//!
//! Channels never fail outward. Each attempt resolves to a
//! [`DeliveryOutcome`] within a bounded time.
//! ============================================================================

mod email;
mod sheet;

pub use email::{EmailChannel, EmailJsConfig, EmailTemplate, EMAILJS_API};
pub use sheet::{SheetChannel, SheetMode};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::{ChannelId, DeliveryOutcome, ScoreResult};

/// Upper bound on a single delivery attempt
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// One external delivery target
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Attempt delivery. Never panics or errors; failures come back as
    /// `success = false` with a readable message.
    async fn deliver(&self, result: &ScoreResult) -> DeliveryOutcome;
}

/// Whether the transport can observe that the sink received the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Status and body are inspected; a timeout is a failure
    Observable,
    /// Receipt cannot be confirmed; silence past the timeout counts as
    /// delivered as long as the transport itself did not error
    Opaque,
}

/// Run one transport attempt under `timeout` and fold the result into an
/// outcome
pub async fn bounded<F>(
    channel: ChannelId,
    timeout: Duration,
    ack: Acknowledgement,
    attempt: F,
) -> DeliveryOutcome
where
    F: Future<Output = anyhow::Result<String>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(message)) => DeliveryOutcome::delivered(message),
        Ok(Err(e)) => {
            warn!("{} delivery failed: {:#}", channel, e);
            DeliveryOutcome::failed(format!("{:#}", e))
        }
        Err(_) => match ack {
            Acknowledgement::Opaque => DeliveryOutcome::delivered(format!(
                "No acknowledgement within {:?}; assumed delivered",
                timeout
            )),
            Acknowledgement::Observable => {
                warn!("{} delivery timed out after {:?}", channel, timeout);
                DeliveryOutcome::failed(format!("Timed out after {:?}", timeout))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_bounded_passes_success_through() {
        let outcome = bounded(ChannelId::Sheet, SHORT, Acknowledgement::Observable, async {
            Ok("row 12".to_string())
        })
        .await;
        assert_eq!(outcome, DeliveryOutcome::delivered("row 12"));
    }

    #[tokio::test]
    async fn test_bounded_converts_errors() {
        let outcome = bounded(ChannelId::Email, SHORT, Acknowledgement::Opaque, async {
            Err::<String, _>(anyhow!("connection refused"))
        })
        .await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_bounded_timeout_depends_on_acknowledgement() {
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("late".to_string())
        };

        let opaque = bounded(ChannelId::Sheet, SHORT, Acknowledgement::Opaque, slow()).await;
        assert!(opaque.success);
        assert!(opaque.message.contains("assumed delivered"));

        let observable = bounded(ChannelId::Sheet, SHORT, Acknowledgement::Observable, slow()).await;
        assert!(!observable.success);
        assert!(observable.message.contains("Timed out"));
    }
}
