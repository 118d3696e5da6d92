//! ============================================================================
//! Sheet Channel - Spreadsheet logging via web hook form post
//! ============================================================================
//! Posts each result as `application/x-www-form-urlencoded`:
//! - `data`: the full ScoreResult as JSON
//! - one named field per value for sink-side convenience
//!   (`dominantGift`, `teacherScore`, ...)
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{bounded, Acknowledgement, Channel, ATTEMPT_TIMEOUT};
use crate::types::{ChannelId, DeliveryOutcome, GiftType, ScoreResult};

/// How much of the sink's response the channel trusts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetMode {
    /// Response is not inspected; timeout means assumed delivered
    Opaque,
    /// Non-2xx or an `{"result":"error"}` body is a failure
    Confirmed,
}

impl SheetMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "opaque" | "no-cors" => Some(Self::Opaque),
            "confirmed" | "cors" => Some(Self::Confirmed),
            _ => None,
        }
    }

    fn acknowledgement(&self) -> Acknowledgement {
        match self {
            Self::Opaque => Acknowledgement::Opaque,
            Self::Confirmed => Acknowledgement::Observable,
        }
    }
}

/// Channel posting results to a spreadsheet web hook
pub struct SheetChannel {
    client: reqwest::Client,
    url: String,
    mode: SheetMode,
    timeout: Duration,
}

impl SheetChannel {
    pub fn new(url: String, mode: SheetMode) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            mode,
            timeout: ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn mode(&self) -> SheetMode {
        self.mode
    }

    /// Form fields sent to the sink
    pub fn form_fields(result: &ScoreResult) -> Result<Vec<(String, String)>> {
        let data = serde_json::to_string(result)
            .map_err(|e| anyhow!("Failed to serialize result: {}", e))?;

        let mut fields = vec![
            ("data".to_string(), data),
            ("resultId".to_string(), result.id.clone()),
            ("userId".to_string(), result.user_id.clone()),
            ("fullName".to_string(), result.full_name.clone().unwrap_or_default()),
            ("firstName".to_string(), result.first_name.clone().unwrap_or_default()),
            ("email".to_string(), result.email.clone().unwrap_or_default()),
            ("dominantGift".to_string(), result.dominant_gift.to_string()),
            ("secondaryGift".to_string(), result.secondary_gift.to_string()),
            ("timestamp".to_string(), result.timestamp.to_string()),
        ];
        for gift in GiftType::ALL {
            fields.push((format!("{}Score", gift), result.score_for(gift).to_string()));
        }
        Ok(fields)
    }

    async fn post(&self, result: &ScoreResult) -> Result<String> {
        let fields = Self::form_fields(result)?;
        debug!("Posting result {} to sheet ({:?} mode)", result.id, self.mode);

        let response = self
            .client
            .post(&self.url)
            .form(&fields)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to post to sheet: {}", e))?;

        if self.mode == SheetMode::Opaque {
            // Status is not trusted in opaque mode
            return Ok("Posted to sheet".to_string());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("Sheet endpoint error {}: {}", status, body));
        }

        match serde_json::from_str::<SheetResponse>(&body) {
            Ok(reply) if reply.result.eq_ignore_ascii_case("error") => Err(anyhow!(
                "Sheet rejected result: {}",
                reply.error.unwrap_or_else(|| "unknown error".to_string())
            )),
            Ok(reply) => Ok(match reply.row {
                Some(row) => format!("Logged to sheet row {}", row),
                None => "Logged to sheet".to_string(),
            }),
            // Sinks that answer with plain text are taken at their status code
            Err(_) => Ok("Logged to sheet".to_string()),
        }
    }
}

#[async_trait]
impl Channel for SheetChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Sheet
    }

    async fn deliver(&self, result: &ScoreResult) -> DeliveryOutcome {
        let outcome = bounded(
            ChannelId::Sheet,
            self.timeout,
            self.mode.acknowledgement(),
            self.post(result),
        )
        .await;
        if outcome.success {
            info!("Sheet delivery for result {}: {}", result.id, outcome.message);
        }
        outcome
    }
}

// ============================================================================
// Apps Script Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SheetResponse {
    result: String,
    #[serde(default)]
    row: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}
