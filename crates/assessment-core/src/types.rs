//! ============================================================================
//! Core Types for the Gifts Assessment
//! ============================================================================
//! Defines the answer, result, and delivery envelope structures.
//! These types are serialized to JSON for the local store and the sinks, so
//! field names follow the camelCase shape older clients already wrote.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of gift categories in the assessment
pub const GIFT_COUNT: usize = 7;

/// Lowest and highest score a single answer may carry
pub const MIN_ANSWER_SCORE: u8 = 1;
pub const MAX_ANSWER_SCORE: u8 = 5;

/// One of the seven motivational gift categories.
///
/// Declaration order is the fixed category order: totals, tie-breaks, sheet
/// columns and display all iterate in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiftType {
    Perceiver,
    Server,
    Teacher,
    Exhorter,
    Giver,
    Administrator,
    Compassion,
}

impl GiftType {
    /// All categories in fixed order
    pub const ALL: [GiftType; GIFT_COUNT] = [
        GiftType::Perceiver,
        GiftType::Server,
        GiftType::Teacher,
        GiftType::Exhorter,
        GiftType::Giver,
        GiftType::Administrator,
        GiftType::Compassion,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "perceiver" | "prophet" | "prophecy" => Some(Self::Perceiver),
            "server" | "servant" | "serving" => Some(Self::Server),
            "teacher" | "teaching" => Some(Self::Teacher),
            "exhorter" | "exhortation" | "encourager" => Some(Self::Exhorter),
            "giver" | "giving" => Some(Self::Giver),
            "administrator" | "ruler" | "leadership" => Some(Self::Administrator),
            "compassion" | "mercy" => Some(Self::Compassion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perceiver => "perceiver",
            Self::Server => "server",
            Self::Teacher => "teacher",
            Self::Exhorter => "exhorter",
            Self::Giver => "giver",
            Self::Administrator => "administrator",
            Self::Compassion => "compassion",
        }
    }

    /// Position in the fixed category order
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for GiftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: String,
    pub gift_type: GiftType,
    /// Agreement on a 1-5 scale
    pub score: u8,
}

impl Answer {
    pub fn new(question_id: impl Into<String>, gift_type: GiftType, score: u8) -> Self {
        Self {
            question_id: question_id.into(),
            gift_type,
            score,
        }
    }

    pub fn is_valid(&self) -> bool {
        (MIN_ANSWER_SCORE..=MAX_ANSWER_SCORE).contains(&self.score)
    }
}

/// Per-category totals, always holding all seven categories
pub type GiftScores = BTreeMap<GiftType, u32>;

/// Build a score map with every category set to zero
pub fn empty_scores() -> GiftScores {
    GiftType::ALL.iter().map(|g| (*g, 0)).collect()
}

/// Computed result of one completed assessment.
///
/// Created once at completion and never mutated afterwards; a retake writes
/// a new result over the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    /// Result identifier (empty on records written before ids existed)
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub scores: GiftScores,
    pub dominant_gift: GiftType,
    pub secondary_gift: GiftType,
    /// Completion time, epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

impl ScoreResult {
    /// Total for one category (0 if absent)
    pub fn score_for(&self, gift: GiftType) -> u32 {
        self.scores.get(&gift).copied().unwrap_or(0)
    }

    /// Totals as an ordered array in category order (the sheet column layout)
    pub fn column_scores(&self) -> [u32; GIFT_COUNT] {
        let mut columns = [0; GIFT_COUNT];
        for gift in GiftType::ALL {
            columns[gift.index()] = self.score_for(gift);
        }
        columns
    }

    /// Sum of all category totals
    pub fn total(&self) -> u32 {
        self.scores.values().sum()
    }

    /// Insert zero totals for any category a legacy record left out
    pub fn fill_missing_scores(&mut self) {
        for gift in GiftType::ALL {
            self.scores.entry(gift).or_insert(0);
        }
    }

    /// Best display name: full name, then first name
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .or(self.first_name.as_deref())
            .filter(|n| !n.trim().is_empty())
    }

    /// Subject email if one was supplied and is non-blank
    pub fn subject_email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

/// Identity details the subject chose to supply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

impl UserInfo {
    /// First name derived from the full name when not given explicitly
    pub fn resolved_first_name(&self) -> Option<String> {
        self.first_name.clone().or_else(|| {
            self.full_name
                .as_deref()
                .and_then(|n| n.split_whitespace().next())
                .map(str::to_string)
        })
    }
}

/// External delivery target for a computed result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    /// Spreadsheet-backed logging endpoint
    Sheet,
    /// Transactional email provider
    Email,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::Sheet, ChannelId::Email];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sheet" | "sheets" => Some(Self::Sheet),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sheet => "sheet",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a not-yet-confirmed delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub result: ScoreResult,
    pub channel: ChannelId,
    /// Envelope creation time, epoch milliseconds
    pub created_at: i64,
    /// Completed delivery attempts; only ever increases
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingSubmission {
    pub fn new(result: ScoreResult, channel: ChannelId, created_at: i64) -> Self {
        Self {
            result,
            channel,
            created_at,
            attempts: 0,
            last_attempt: None,
            last_error: None,
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, error: impl Into<String>, at: i64) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(at);
        self.last_error = Some(error.into());
    }

    /// Age in milliseconds at `now`
    pub fn age_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.created_at)
    }
}

/// Outcome of one delivery attempt on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub message: String,
}

impl DeliveryOutcome {
    pub fn delivered(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            message: if message.trim().is_empty() {
                "delivery failed".to_string()
            } else {
                message
            },
        }
    }
}

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
