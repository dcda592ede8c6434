use async_trait::async_trait;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{EmailAddress, GroupId, SignupId, SignupState};

/// Various errors that can occur against the signup store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Stored signup record is corrupt: {0}")]
    Corrupt(String),
}

/// Wrapper for store results
pub type StoreResult<T> = Result<T, StoreError>;

/// One stored signup attempt, keyed by its deterministic identity.
#[derive(Debug, Clone)]
pub struct SignupRecord {
    pub id: SignupId,
    pub email: EmailAddress,
    pub group: GroupId,
    pub state: SignupState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Confirmation attempts observed so far, for replay diagnostics
    pub attempts: i32,
}

impl SignupRecord {
    /// Build a fresh `Pending` candidate for (email, group) with the given TTL
    pub fn pending(email: EmailAddress, group: GroupId, ttl: Duration) -> Self {
        let id = SignupId::derive(&email, &group);
        let created_at = Utc::now();
        let expires_at = created_at + ttl;

        Self {
            id,
            email,
            group,
            state: SignupState::Pending,
            created_at,
            expires_at,
            attempts: 0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Durable home of signup records.
///
/// The store exclusively owns the authoritative state: the workflow engine
/// never writes a state it has not first gated through one of the two atomic
/// primitives here. `get_or_create` and `compare_and_transition` must be
/// atomic under concurrent callers (native conditional writes, not
/// read-then-write), since they are the only defense against duplicate
/// records and double-applied transitions.
#[async_trait]
pub trait SignupStore: Send + Sync {
    /// Return the live (non-terminal) record for the candidate's identity if
    /// one exists, untouched; otherwise persist the candidate. The bool is
    /// true when the candidate was stored.
    async fn get_or_create(&self, candidate: SignupRecord) -> StoreResult<(SignupRecord, bool)>;

    async fn get(&self, id: &SignupId) -> StoreResult<Option<SignupRecord>>;

    /// Conditionally advance `id` from `expected` to `next`. Returns false
    /// without touching the record when the stored state differs from
    /// `expected` at update time.
    async fn compare_and_transition(
        &self,
        id: &SignupId,
        expected: SignupState,
        next: SignupState,
    ) -> StoreResult<bool>;

    /// Bump the confirmation-attempt counter
    async fn record_attempt(&self, id: &SignupId) -> StoreResult<()>;

    /// Snapshot of every `Confirmed` record still awaiting its membership
    /// change, for the background commit pass
    async fn list_confirmed(&self) -> StoreResult<Vec<SignupRecord>>;

    /// Transition every `Pending` record past its expiry to `Expired`,
    /// returning how many were swept
    async fn mark_expired_sweep(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
