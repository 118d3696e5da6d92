//! ============================================================================
//! Scorer - Per-Category Totals & Dominant/Secondary Selection
//! ============================================================================
//! Reduces a session's answers into seven category totals and picks the
//! dominant and secondary gifts in one linear pass:
//! - Accumulator always starts with every category at zero
//! - Malformed entries are skipped and logged, never an error
//! - Ties resolve to the category that comes first in fixed order
//! ============================================================================

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{
    empty_scores, now_ms, Answer, GiftScores, GiftType, ScoreResult, UserInfo, MAX_ANSWER_SCORE,
    MIN_ANSWER_SCORE,
};

/// Why a raw answer entry was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnswerError {
    #[error("answer has no question id")]
    MissingQuestionId,

    #[error("answer {0} has no gift type")]
    MissingGiftType(String),

    #[error("answer {question_id} has unknown gift type '{gift_type}'")]
    UnknownGiftType { question_id: String, gift_type: String },

    #[error("answer {0} has a non-numeric score")]
    NonNumericScore(String),

    #[error("answer {question_id} score {score} is outside 1-5")]
    ScoreOutOfRange { question_id: String, score: i64 },

    #[error("answer entry {index} is not an answer object: {reason}")]
    MalformedEntry { index: usize, reason: String },
}

/// Untyped answer as the questionnaire UI hands it over
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnswer {
    #[serde(default, alias = "id")]
    pub question_id: Option<serde_json::Value>,
    #[serde(default, alias = "category")]
    pub gift_type: Option<serde_json::Value>,
    #[serde(default)]
    pub score: Option<serde_json::Value>,
}

impl RawAnswer {
    /// Validate into a typed answer
    pub fn validate(&self) -> Result<Answer, AnswerError> {
        let question_id = match &self.question_id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(AnswerError::MissingQuestionId),
        };

        let gift_type = match &self.gift_type {
            None | Some(serde_json::Value::Null) => {
                return Err(AnswerError::MissingGiftType(question_id))
            }
            Some(serde_json::Value::String(g)) if g.trim().is_empty() => {
                return Err(AnswerError::MissingGiftType(question_id))
            }
            Some(serde_json::Value::String(g)) => {
                GiftType::from_str(g).ok_or_else(|| AnswerError::UnknownGiftType {
                    question_id: question_id.clone(),
                    gift_type: g.clone(),
                })?
            }
            Some(other) => {
                return Err(AnswerError::UnknownGiftType {
                    question_id,
                    gift_type: other.to_string(),
                })
            }
        };

        let score = match &self.score {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .ok_or_else(|| AnswerError::NonNumericScore(question_id.clone()))?;

        if !(i64::from(MIN_ANSWER_SCORE)..=i64::from(MAX_ANSWER_SCORE)).contains(&score) {
            return Err(AnswerError::ScoreOutOfRange { question_id, score });
        }

        Ok(Answer::new(question_id, gift_type, score as u8))
    }
}

/// Validate one array element as an answer
pub fn parse_entry(index: usize, entry: serde_json::Value) -> Result<Answer, AnswerError> {
    serde_json::from_value::<RawAnswer>(entry)
        .map_err(|e| AnswerError::MalformedEntry {
            index,
            reason: e.to_string(),
        })?
        .validate()
}

/// Parse a JSON array of raw answers, skipping entries that fail validation.
/// Only input that is not a JSON array at all is an error.
pub fn parse_answers(json: &str) -> Result<Vec<Answer>, serde_json::Error> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let mut answers = Vec::with_capacity(raw.len());
    for (index, entry) in raw.into_iter().enumerate() {
        match parse_entry(index, entry) {
            Ok(answer) => answers.push(answer),
            Err(e) => warn!("Skipping malformed answer: {}", e),
        }
    }
    debug!("Parsed {} valid answers", answers.len());
    Ok(answers)
}

/// Answers for one session keyed by question id; a later answer to the same
/// question replaces the earlier one
#[derive(Debug, Clone, Default)]
pub struct AnswerSheet {
    answers: BTreeMap<String, Answer>,
}

impl AnswerSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an answer, returning the one it replaced
    pub fn record(&mut self, answer: Answer) -> Option<Answer> {
        self.answers.insert(answer.question_id.clone(), answer)
    }

    pub fn get(&self, question_id: &str) -> Option<&Answer> {
        self.answers.get(question_id)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn answers(&self) -> Vec<Answer> {
        self.answers.values().cloned().collect()
    }
}

impl FromIterator<Answer> for AnswerSheet {
    fn from_iter<I: IntoIterator<Item = Answer>>(iter: I) -> Self {
        let mut sheet = AnswerSheet::new();
        for answer in iter {
            sheet.record(answer);
        }
        sheet
    }
}

/// Scorer output before identity is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoring {
    pub scores: GiftScores,
    pub dominant: GiftType,
    pub secondary: GiftType,
}

impl Scoring {
    /// Attach identity and a timestamp, producing the result to persist
    pub fn into_result(self, identity: &UserInfo) -> ScoreResult {
        ScoreResult {
            id: Uuid::new_v4().to_string(),
            user_id: identity.user_id.clone(),
            scores: self.scores,
            dominant_gift: self.dominant,
            secondary_gift: self.secondary,
            timestamp: now_ms(),
            full_name: identity.full_name.clone(),
            email: identity.email.clone(),
            first_name: identity.resolved_first_name(),
        }
    }
}

/// Sum answers per category and pick dominant/secondary
pub fn score(answers: &[Answer]) -> Scoring {
    let mut scores = empty_scores();

    for answer in answers {
        if !answer.is_valid() {
            warn!(
                "Skipping answer {} with out-of-range score {}",
                answer.question_id, answer.score
            );
            continue;
        }
        *scores.entry(answer.gift_type).or_insert(0) += u32::from(answer.score);
    }

    let (dominant, secondary) = rank_top_two(&scores);
    debug!("Scored {} answers: dominant={}, secondary={}", answers.len(), dominant, secondary);

    Scoring {
        scores,
        dominant,
        secondary,
    }
}

/// Single pass over the fixed order tracking highest and second-highest.
/// Only a strictly greater total displaces a slot, so the earlier category
/// wins ties.
pub fn rank_top_two(scores: &GiftScores) -> (GiftType, GiftType) {
    let total = |gift: GiftType| scores.get(&gift).copied().unwrap_or(0);

    let [first, second, rest @ ..] = GiftType::ALL;
    let (mut best, mut runner_up) = if total(second) > total(first) {
        ((second, total(second)), (first, total(first)))
    } else {
        ((first, total(first)), (second, total(second)))
    };

    for gift in rest {
        let value = total(gift);
        if value > best.1 {
            runner_up = best;
            best = (gift, value);
        } else if value > runner_up.1 {
            runner_up = (gift, value);
        }
    }

    (best.0, runner_up.0)
}
