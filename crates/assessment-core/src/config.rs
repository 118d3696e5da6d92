//! ============================================================================
//! Configuration - Environment-driven settings for the pipeline
//! ============================================================================
//! Every setting comes from an environment variable (the CLI loads `.env`
//! first). A channel whose settings are incomplete is left out with a
//! warning rather than failing startup.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::channel::{Channel, EmailChannel, EmailJsConfig, SheetChannel, SheetMode};
use crate::retry::RetryPolicy;

/// Shortest accepted sweep interval
const MIN_RETRY_INTERVAL_SECS: u64 = 1;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AssessmentConfig {
    /// redb file path (default: ~/.gifts/assessment.redb)
    pub db_path: Option<String>,
    /// Spreadsheet web hook URL
    pub sheet_url: Option<String>,
    pub sheet_mode: SheetMode,
    pub emailjs_service_id: Option<String>,
    pub emailjs_template_id: Option<String>,
    pub emailjs_user_template_id: Option<String>,
    pub emailjs_public_key: Option<String>,
    pub emailjs_private_key: Option<String>,
    /// Where operator copies of every result go
    pub operator_email: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl AssessmentConfig {
    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let sheet_mode = match var("GIFTS_SHEET_MODE") {
            None => SheetMode::Opaque,
            Some(raw) => SheetMode::from_str(&raw).unwrap_or_else(|| {
                warn!("Unknown GIFTS_SHEET_MODE '{}', using opaque", raw);
                SheetMode::Opaque
            }),
        };

        let secs = |key: &str, min: u64| var(key).and_then(|v| parse_secs(key, &v, min));
        let mut retry = RetryPolicy::default();
        if let Some(delay) = secs("GIFTS_RETRY_SETTLE_SECS", 0) {
            retry.settle_delay = delay;
        }
        if let Some(interval) = secs("GIFTS_RETRY_INTERVAL_SECS", MIN_RETRY_INTERVAL_SECS) {
            retry.interval = interval;
        }

        Self {
            db_path: var("GIFTS_DB_PATH"),
            sheet_url: var("GIFTS_SHEET_URL"),
            sheet_mode,
            emailjs_service_id: var("EMAILJS_SERVICE_ID"),
            emailjs_template_id: var("EMAILJS_TEMPLATE_ID"),
            emailjs_user_template_id: var("EMAILJS_USER_TEMPLATE_ID"),
            emailjs_public_key: var("EMAILJS_PUBLIC_KEY"),
            emailjs_private_key: var("EMAILJS_PRIVATE_KEY"),
            operator_email: var("GIFTS_OPERATOR_EMAIL"),
            retry,
        }
    }

    /// EmailJS settings, if all required values are present
    pub fn emailjs(&self) -> Option<EmailJsConfig> {
        let required = [
            ("EMAILJS_SERVICE_ID", &self.emailjs_service_id),
            ("EMAILJS_TEMPLATE_ID", &self.emailjs_template_id),
            ("EMAILJS_PUBLIC_KEY", &self.emailjs_public_key),
            ("GIFTS_OPERATOR_EMAIL", &self.operator_email),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            warn!("Email channel disabled; missing {}", missing.join(", "));
            return None;
        }

        Some(EmailJsConfig {
            service_id: self.emailjs_service_id.clone()?,
            template_id: self.emailjs_template_id.clone()?,
            user_template_id: self.emailjs_user_template_id.clone(),
            public_key: self.emailjs_public_key.clone()?,
            private_key: self.emailjs_private_key.clone(),
            operator_email: self.operator_email.clone()?,
        })
    }

    /// Instantiate every channel whose configuration is complete
    pub fn build_channels(&self) -> Vec<Arc<dyn Channel>> {
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();

        match &self.sheet_url {
            Some(url) => {
                info!("Sheet channel enabled ({:?} mode)", self.sheet_mode);
                channels.push(Arc::new(SheetChannel::new(url.clone(), self.sheet_mode)));
            }
            None => warn!("Sheet channel disabled; GIFTS_SHEET_URL not set"),
        }

        if let Some(config) = self.emailjs() {
            info!("Email channel enabled (operator {})", config.operator_email);
            channels.push(Arc::new(EmailChannel::new(config)));
        }

        channels
    }
}

fn parse_secs(key: &str, raw: &str, min: u64) -> Option<Duration> {
    match raw.parse::<u64>() {
        Ok(secs) if secs < min => {
            warn!("Ignoring {}='{}': must be at least {} seconds", key, raw, min);
            None
        }
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!("Ignoring {}='{}': {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelId;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> AssessmentConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AssessmentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn full_email_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("EMAILJS_SERVICE_ID", "service_x"),
            ("EMAILJS_TEMPLATE_ID", "template_x"),
            ("EMAILJS_PUBLIC_KEY", "pk_x"),
            ("GIFTS_OPERATOR_EMAIL", "ops@example.com"),
        ]
    }

    #[test]
    fn test_empty_environment_builds_no_channels() {
        let config = config_from(&[]);
        assert!(config.db_path.is_none());
        assert_eq!(config.sheet_mode, SheetMode::Opaque);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.build_channels().is_empty());
    }

    #[test]
    fn test_sheet_mode_parsing_falls_back() {
        let config = config_from(&[("GIFTS_SHEET_MODE", "confirmed")]);
        assert_eq!(config.sheet_mode, SheetMode::Confirmed);

        let config = config_from(&[("GIFTS_SHEET_MODE", "jsonp")]);
        assert_eq!(config.sheet_mode, SheetMode::Opaque);
    }

    #[test]
    fn test_email_requires_all_settings() {
        let mut vars = full_email_vars();
        vars.pop();
        assert!(config_from(&vars).emailjs().is_none());

        let email = config_from(&full_email_vars()).emailjs().unwrap();
        assert_eq!(email.operator_email, "ops@example.com");
        assert!(email.user_template_id.is_none());
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config_from(&[("GIFTS_SHEET_URL", "   "), ("GIFTS_DB_PATH", "")]);
        assert!(config.sheet_url.is_none());
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_build_channels_in_order() {
        let mut vars = full_email_vars();
        vars.push(("GIFTS_SHEET_URL", "https://script.example.com/exec"));
        let ids: Vec<ChannelId> = config_from(&vars)
            .build_channels()
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(ids, vec![ChannelId::Sheet, ChannelId::Email]);
    }

    #[test]
    fn test_retry_overrides() {
        let config = config_from(&[
            ("GIFTS_RETRY_SETTLE_SECS", "0"),
            ("GIFTS_RETRY_INTERVAL_SECS", "60"),
        ]);
        assert_eq!(config.retry.settle_delay, Duration::ZERO);
        assert_eq!(config.retry.interval, Duration::from_secs(60));

        let config = config_from(&[("GIFTS_RETRY_INTERVAL_SECS", "soon")]);
        assert_eq!(config.retry.interval, Duration::from_secs(300));
    }

    #[test]
    fn test_zero_interval_keeps_default() {
        let config = config_from(&[
            ("GIFTS_RETRY_SETTLE_SECS", "0"),
            ("GIFTS_RETRY_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.retry.settle_delay, Duration::ZERO);
        assert_eq!(config.retry.interval, Duration::from_secs(300));

        let config = config_from(&[("GIFTS_RETRY_INTERVAL_SECS", "1")]);
        assert_eq!(config.retry.interval, Duration::from_secs(1));
    }
}
