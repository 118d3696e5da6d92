// ============================================================================
// ResultStore - Local system of record for results and pending deliveries
// ============================================================================
// Fixed keys, JSON values:
//   currentResult               current ScoreResult
//   giftTestResults             legacy copy of the current ScoreResult
//   currentUserId               opaque per-install user id
//   userInfo                    identity the subject supplied
//   pendingSubmission.<channel> PendingSubmission envelope
//
// Pipeline-facing operations never return errors: storage failures are
// logged and read back as "nothing stored".
// ============================================================================

mod backend;

pub use backend::{MemoryBackend, RedbBackend, StorageBackend};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::types::{ChannelId, PendingSubmission, ScoreResult, UserInfo};

pub const CURRENT_RESULT_KEY: &str = "currentResult";
pub const LEGACY_RESULT_KEY: &str = "giftTestResults";
pub const USER_ID_KEY: &str = "currentUserId";
pub const USER_INFO_KEY: &str = "userInfo";
pub const PENDING_KEY_PREFIX: &str = "pendingSubmission.";

/// Errors that can occur inside the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded writing {key}: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cannot determine home directory")]
    HomeDirUnavailable,
}

/// Storage key for a channel's pending envelope
pub fn pending_key(channel: ChannelId) -> String {
    format!("{}{}", PENDING_KEY_PREFIX, channel)
}

/// Everything in the store, for export
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub location: String,
    pub user_id: Option<String>,
    pub user_info: Option<UserInfo>,
    pub current_result: Option<ScoreResult>,
    pub pending: Vec<PendingSubmission>,
}

/// Local result store over a pluggable backend
pub struct ResultStore {
    backend: Box<dyn StorageBackend>,
}

impl ResultStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Open the redb-backed store (see [`RedbBackend::open`] for path rules)
    pub fn open(path: Option<&str>) -> Result<Self, StoreError> {
        Ok(Self::new(RedbBackend::open(path)?))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// Persist the current result under the current and legacy keys.
    /// Failures are logged; the result is then simply not recoverable later.
    pub fn save_result(&self, result: &ScoreResult) {
        if let Err(e) = self.put_json(CURRENT_RESULT_KEY, result) {
            error!("Failed to save result {}: {}", result.id, e);
            return;
        }
        if let Err(e) = self.put_json(LEGACY_RESULT_KEY, result) {
            warn!("Failed to save legacy copy of result {}: {}", result.id, e);
        }
        info!(
            "Saved result {} for user {} (dominant: {})",
            result.id, result.user_id, result.dominant_gift
        );
    }

    /// Current result, falling back to the legacy key
    pub fn load_result(&self) -> Option<ScoreResult> {
        for key in [CURRENT_RESULT_KEY, LEGACY_RESULT_KEY] {
            match self.get_json::<ScoreResult>(key) {
                Ok(Some(mut result)) => {
                    result.fill_missing_scores();
                    return Some(result);
                }
                Ok(None) => {}
                Err(e) => warn!("Unreadable result under {}: {}", key, e),
            }
        }
        None
    }

    /// The stored result, only if its id matches
    pub fn load_result_by_id(&self, id: &str) -> Option<ScoreResult> {
        self.load_result().filter(|r| r.id == id)
    }

    /// The stored result, only if it belongs to `user_id`
    pub fn load_most_recent_by_user(&self, user_id: &str) -> Option<ScoreResult> {
        self.load_result().filter(|r| r.user_id == user_id)
    }

    // ========================================================================
    // Pending Submissions
    // ========================================================================

    pub fn save_pending(&self, pending: &PendingSubmission) {
        let key = pending_key(pending.channel);
        match self.put_json(&key, pending) {
            Ok(()) => debug!(
                "Saved pending {} submission (attempts: {})",
                pending.channel, pending.attempts
            ),
            Err(e) => error!("Failed to save pending {} submission: {}", pending.channel, e),
        }
    }

    pub fn load_pending(&self, channel: ChannelId) -> Option<PendingSubmission> {
        match self.get_json::<PendingSubmission>(&pending_key(channel)) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Unreadable pending {} submission: {}", channel, e);
                None
            }
        }
    }

    pub fn clear_pending(&self, channel: ChannelId) {
        match self.backend.remove(&pending_key(channel)) {
            Ok(true) => debug!("Cleared pending {} submission", channel),
            Ok(false) => {}
            Err(e) => error!("Failed to clear pending {} submission: {}", channel, e),
        }
    }

    /// All pending envelopes, in channel order
    pub fn list_pending(&self) -> Vec<PendingSubmission> {
        ChannelId::ALL
            .iter()
            .filter_map(|channel| self.load_pending(*channel))
            .collect()
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// The install's user id, generated and stored on first use.
    /// If storage is unavailable a fresh id is still returned.
    pub fn user_id(&self) -> String {
        match self.get_json::<String>(USER_ID_KEY) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!("Unreadable user id, generating a new one: {}", e),
        }

        let id = Uuid::new_v4().to_string();
        match self.put_json(USER_ID_KEY, &id) {
            Ok(()) => info!("Generated user id {}", id),
            Err(e) => error!("Failed to persist user id {}: {}", id, e),
        }
        id
    }

    pub fn save_user_info(&self, info: &UserInfo) {
        if let Err(e) = self.put_json(USER_INFO_KEY, info) {
            error!("Failed to save user info: {}", e);
        }
    }

    pub fn load_user_info(&self) -> Option<UserInfo> {
        self.get_json(USER_INFO_KEY).unwrap_or_else(|e| {
            warn!("Unreadable user info: {}", e);
            None
        })
    }

    /// Forget the supplied identity but keep the user id
    pub fn clear_user_info(&self) {
        if let Err(e) = self.backend.remove(USER_INFO_KEY) {
            error!("Failed to clear user info: {}", e);
        }
    }

    // ========================================================================
    // Export
    // ========================================================================

    pub fn export(&self) -> StoreSnapshot {
        StoreSnapshot {
            location: self.location(),
            user_id: self.get_json(USER_ID_KEY).ok().flatten(),
            user_info: self.load_user_info(),
            current_result: self.load_result(),
            pending: self.list_pending(),
        }
    }

    /// Raw keys present in the backend
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.backend.keys()
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.put(key, &bytes)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.backend.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
