use std::collections::HashMap;

use async_trait::async_trait;

use chrono::{DateTime, Utc};

use tokio::sync::Mutex;

use crate::domain::{SignupId, SignupState};

use super::{SignupRecord, SignupStore, StoreResult};

/// In-memory signup store.
///
/// The mutex around the whole map plays the role of the database's
/// conditional writes: every primitive completes under a single lock hold.
/// Used by the test suite and for running the service without Postgres.
#[derive(Debug, Default)]
pub struct InMemorySignupStore {
    records: Mutex<HashMap<SignupId, SignupRecord>>,
}

impl InMemorySignupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignupStore for InMemorySignupStore {
    async fn get_or_create(&self, candidate: SignupRecord) -> StoreResult<(SignupRecord, bool)> {
        let mut records = self.records.lock().await;

        match records.get(&candidate.id) {
            Some(existing) if !existing.state.is_terminal() => Ok((existing.clone(), false)),
            _ => {
                records.insert(candidate.id.clone(), candidate.clone());
                Ok((candidate, true))
            }
        }
    }

    async fn get(&self, id: &SignupId) -> StoreResult<Option<SignupRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(id).cloned())
    }

    async fn compare_and_transition(
        &self,
        id: &SignupId,
        expected: SignupState,
        next: SignupState,
    ) -> StoreResult<bool> {
        let mut records = self.records.lock().await;

        match records.get_mut(id) {
            Some(record) if record.state == expected => {
                record.state = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_attempt(&self, id: &SignupId) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(id) {
            record.attempts += 1;
        }
        Ok(())
    }

    async fn list_confirmed(&self) -> StoreResult<Vec<SignupRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|record| record.state == SignupState::Confirmed)
            .cloned()
            .collect())
    }

    async fn mark_expired_sweep(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut records = self.records.lock().await;

        let mut swept = 0;
        for record in records.values_mut() {
            if record.state == SignupState::Pending && record.expires_at < now {
                record.state = SignupState::Expired;
                swept += 1;
            }
        }

        Ok(swept)
    }
}
