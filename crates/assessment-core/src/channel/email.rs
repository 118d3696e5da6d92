//! ============================================================================
//! Email Channel - Result emails via the EmailJS REST API
//! ============================================================================
//! Sends one email to the operator and, when the subject supplied an
//! address, a second independent email to the subject:
//! - Operator send decides the overall outcome
//! - Missing subject email skips that send ("operator only")
//! - Template variables come from the result plus the gift catalog
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{bounded, Acknowledgement, Channel, ATTEMPT_TIMEOUT};
use crate::catalog;
use crate::types::{ChannelId, DeliveryOutcome, GiftType, ScoreResult};

/// EmailJS send endpoint
pub const EMAILJS_API: &str = "https://api.emailjs.com/api/v1.0/email/send";

/// Sender name shown in template headers
const FROM_NAME: &str = "Spiritual Gifts Assessment";

/// EmailJS account settings
#[derive(Debug, Clone)]
pub struct EmailJsConfig {
    pub service_id: String,
    /// Template for the operator copy
    pub template_id: String,
    /// Template for the subject copy (falls back to `template_id`)
    pub user_template_id: Option<String>,
    /// Public key, sent as `user_id`
    pub public_key: String,
    /// Private key, sent as `accessToken` when set
    pub private_key: Option<String>,
    pub operator_email: String,
}

impl EmailJsConfig {
    fn subject_template(&self) -> &str {
        self.user_template_id.as_deref().unwrap_or(&self.template_id)
    }
}

/// Template variables for one email.
/// Derived entirely from a result and the static gift catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailTemplate {
    pub to_email: String,
    pub to_name: String,
    pub from_name: String,
    pub reply_to: String,
    pub user_name: String,
    pub user_email: String,
    pub result_id: String,
    pub test_date: String,
    pub dominant_gift: String,
    pub dominant_summary: String,
    pub dominant_strengths: String,
    pub dominant_challenges: String,
    pub dominant_scripture: String,
    pub secondary_gift: String,
    pub secondary_summary: String,
    pub perceiver_score: u32,
    pub server_score: u32,
    pub teacher_score: u32,
    pub exhorter_score: u32,
    pub giver_score: u32,
    pub administrator_score: u32,
    pub compassion_score: u32,
    pub scores_summary: String,
}

impl EmailTemplate {
    pub fn for_recipient(result: &ScoreResult, to_email: &str, to_name: &str) -> Self {
        let dominant = catalog::describe(result.dominant_gift);
        let secondary = catalog::describe(result.secondary_gift);
        let user_email = result.subject_email().unwrap_or_default().to_string();

        let scores_summary = GiftType::ALL
            .iter()
            .map(|g| format!("{}: {}", catalog::describe(*g).name, result.score_for(*g)))
            .collect::<Vec<_>>()
            .join(", ");

        let test_date = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(result.timestamp)
            .map(|dt| dt.format("%B %-d, %Y").to_string())
            .unwrap_or_else(|| "unknown date".to_string());

        Self {
            to_email: to_email.to_string(),
            to_name: to_name.to_string(),
            from_name: FROM_NAME.to_string(),
            reply_to: user_email.clone(),
            user_name: result.display_name().unwrap_or("Anonymous").to_string(),
            user_email,
            result_id: result.id.clone(),
            test_date,
            dominant_gift: dominant.name.to_string(),
            dominant_summary: dominant.summary.to_string(),
            dominant_strengths: dominant.strengths_line(),
            dominant_challenges: dominant.challenges_line(),
            dominant_scripture: dominant.scripture.to_string(),
            secondary_gift: secondary.name.to_string(),
            secondary_summary: secondary.summary.to_string(),
            perceiver_score: result.score_for(GiftType::Perceiver),
            server_score: result.score_for(GiftType::Server),
            teacher_score: result.score_for(GiftType::Teacher),
            exhorter_score: result.score_for(GiftType::Exhorter),
            giver_score: result.score_for(GiftType::Giver),
            administrator_score: result.score_for(GiftType::Administrator),
            compassion_score: result.score_for(GiftType::Compassion),
            scores_summary,
        }
    }
}

/// Channel emailing results through EmailJS
pub struct EmailChannel {
    client: reqwest::Client,
    endpoint: String,
    config: EmailJsConfig,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(config: EmailJsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: EMAILJS_API.to_string(),
            config,
            timeout: ATTEMPT_TIMEOUT,
        }
    }

    /// Point the channel at a different EmailJS-compatible endpoint
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one templated email
    async fn send(&self, template_id: &str, params: &EmailTemplate) -> Result<String> {
        debug!("Sending EmailJS template {} to {}", template_id, params.to_email);

        let request = EmailJsRequest {
            service_id: &self.config.service_id,
            template_id,
            user_id: &self.config.public_key,
            access_token: self.config.private_key.as_deref(),
            template_params: params,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("EmailJS API error {}: {}", status, body));
        }

        Ok(format!("Email sent to {}", params.to_email))
    }

    async fn send_bounded(&self, template_id: &str, params: &EmailTemplate) -> DeliveryOutcome {
        bounded(
            ChannelId::Email,
            self.timeout,
            Acknowledgement::Observable,
            self.send(template_id, params),
        )
        .await
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Email
    }

    async fn deliver(&self, result: &ScoreResult) -> DeliveryOutcome {
        let operator_params =
            EmailTemplate::for_recipient(result, &self.config.operator_email, "Administrator");
        let operator_send = self.send_bounded(&self.config.template_id, &operator_params);

        let Some(subject_email) = result.subject_email() else {
            let operator = operator_send.await;
            if !operator.success {
                return DeliveryOutcome::failed(format!("Operator email failed: {}", operator.message));
            }
            info!("Result {} emailed to operator only", result.id);
            return DeliveryOutcome::delivered(
                "Operator email sent (operator only, no subject email supplied)",
            );
        };

        let subject_params = EmailTemplate::for_recipient(
            result,
            subject_email,
            result.display_name().unwrap_or("Friend"),
        );
        let subject_send = self.send_bounded(self.config.subject_template(), &subject_params);
        let (operator, subject) = tokio::join!(operator_send, subject_send);

        if !operator.success {
            return DeliveryOutcome::failed(format!("Operator email failed: {}", operator.message));
        }
        if !subject.success {
            warn!(
                "Subject email for result {} failed: {}",
                result.id, subject.message
            );
            return DeliveryOutcome::delivered(format!(
                "Operator email sent; subject email failed: {}",
                subject.message
            ));
        }

        info!("Result {} emailed to operator and subject", result.id);
        DeliveryOutcome::delivered("Operator and subject emails sent")
    }
}

// ============================================================================
// EmailJS API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmailJsRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    template_params: &'a EmailTemplate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_result, unreachable_url, MockSink};

    fn config() -> EmailJsConfig {
        EmailJsConfig {
            service_id: "service_test".into(),
            template_id: "template_operator".into(),
            user_template_id: Some("template_subject".into()),
            public_key: "pk_test".into(),
            private_key: None,
            operator_email: "operator@example.com".into(),
        }
    }

    #[test]
    fn test_template_from_result() {
        let result = sample_result(Some("ada@example.com"));
        let template = EmailTemplate::for_recipient(&result, "ada@example.com", "Ada");

        assert_eq!(template.dominant_gift, "Teacher");
        assert_eq!(template.secondary_gift, "Giver");
        assert_eq!(template.teacher_score, 58);
        assert_eq!(template.user_email, "ada@example.com");
        assert_eq!(template.test_date, "November 14, 2023");
        assert!(template.scores_summary.starts_with("Perceiver: 30, Server: 25"));
        assert!(template.dominant_strengths.contains("Thorough researcher"));
    }

    #[test]
    fn test_request_serialization() {
        let result = sample_result(None);
        let params = EmailTemplate::for_recipient(&result, "operator@example.com", "Admin");
        let request = EmailJsRequest {
            service_id: "s",
            template_id: "t",
            user_id: "u",
            access_token: None,
            template_params: &params,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["template_params"]["dominant_gift"], "Teacher");
        assert_eq!(json["template_params"]["user_name"], "Ada Lovelace");
        assert!(json.get("accessToken").is_none());
    }

    #[tokio::test]
    async fn test_operator_only_without_subject_email() {
        let sink = MockSink::respond(200, "OK");
        let channel = EmailChannel::new(config()).with_endpoint(sink.url("/api/v1.0/email/send"));

        let outcome = channel.deliver(&sample_result(None)).await;
        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("operator only"));

        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].body.contains("\"template_id\":\"template_operator\""));
        assert!(requests[0].body.contains("operator@example.com"));
    }

    #[tokio::test]
    async fn test_sends_both_with_subject_email() {
        let sink = MockSink::respond(200, "OK");
        let channel = EmailChannel::new(config()).with_endpoint(sink.url("/send"));

        let outcome = channel.deliver(&sample_result(Some("ada@example.com"))).await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "Operator and subject emails sent");

        let requests = sink.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .any(|r| r.body.contains("\"template_id\":\"template_subject\"")));
    }

    #[tokio::test]
    async fn test_subject_failure_still_succeeds() {
        let sink = MockSink::with(|body| {
            if body.contains("template_subject") {
                (400, "The recipient address is invalid".to_string())
            } else {
                (200, "OK".to_string())
            }
        });
        let channel = EmailChannel::new(config()).with_endpoint(sink.url("/send"));

        let outcome = channel.deliver(&sample_result(Some("ada@example.com"))).await;
        assert!(outcome.success);
        assert!(outcome.message.contains("subject email failed"));
    }

    #[tokio::test]
    async fn test_operator_failure_fails_delivery() {
        let sink = MockSink::respond(403, "API calls are disabled for non-browser applications");
        let channel = EmailChannel::new(config()).with_endpoint(sink.url("/send"));

        let outcome = channel.deliver(&sample_result(Some("ada@example.com"))).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("403"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_resolves() {
        let channel = EmailChannel::new(config()).with_endpoint(unreachable_url());
        let outcome = channel.deliver(&sample_result(None)).await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Operator email failed"));
    }
}
