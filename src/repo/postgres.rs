use async_trait::async_trait;

use chrono::{DateTime, Utc};

use sqlx::{FromRow, PgPool};

use crate::domain::{SignupId, SignupState};

use super::{SignupRecord, SignupStore, StoreError, StoreResult};

/// Postgres-backed signup store.
///
/// Both atomic primitives lean on the database: `get_or_create` is a single
/// `insert .. on conflict` statement and `compare_and_transition` a single
/// conditional `update`, so concurrent engines never race through an
/// application-level read-then-write window.
#[derive(Debug, Clone)]
pub struct PgSignupStore {
    pool: PgPool,
}

impl PgSignupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignupStore for PgSignupStore {
    #[tracing::instrument(name = "Get or create signup record", skip(self, candidate), fields(id = %candidate.id))]
    async fn get_or_create(&self, candidate: SignupRecord) -> StoreResult<(SignupRecord, bool)> {
        // The conflict branch only fires for terminal rows; a live row makes
        // the statement return nothing and we fall through to a plain read.
        let row: Option<PgSignupRow> = sqlx::query_as(
            r#"
            insert into signups (id, email, group_id, state, created_at, expires_at, attempts)
            values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (id) do update
            set email = excluded.email,
                group_id = excluded.group_id,
                state = excluded.state,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                attempts = excluded.attempts
            where signups.state in ('applied', 'expired', 'failed')
            returning id, email, group_id, state, created_at, expires_at, attempts
            "#,
        )
        .bind(candidate.id.as_ref())
        .bind(candidate.email.as_ref())
        .bind(candidate.group.as_ref())
        .bind(candidate.state.as_str())
        .bind(candidate.created_at)
        .bind(candidate.expires_at)
        .bind(candidate.attempts)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok((row.try_into()?, true)),
            None => {
                let existing = self
                    .get(&candidate.id)
                    .await?
                    .ok_or_else(|| sqlx::Error::RowNotFound)?;
                Ok((existing, false))
            }
        }
    }

    #[tracing::instrument(name = "Fetch signup record", skip(self))]
    async fn get(&self, id: &SignupId) -> StoreResult<Option<SignupRecord>> {
        let row: Option<PgSignupRow> = sqlx::query_as(
            "select id, email, group_id, state, created_at, expires_at, attempts
             from signups where id = $1",
        )
        .bind(id.as_ref())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SignupRecord::try_from).transpose()
    }

    #[tracing::instrument(name = "Transition signup state", skip(self))]
    async fn compare_and_transition(
        &self,
        id: &SignupId,
        expected: SignupState,
        next: SignupState,
    ) -> StoreResult<bool> {
        let result = sqlx::query("update signups set state = $3 where id = $1 and state = $2")
            .bind(id.as_ref())
            .bind(expected.as_str())
            .bind(next.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Record confirmation attempt", skip(self))]
    async fn record_attempt(&self, id: &SignupId) -> StoreResult<()> {
        sqlx::query("update signups set attempts = attempts + 1 where id = $1")
            .bind(id.as_ref())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(name = "List confirmed signups", skip(self))]
    async fn list_confirmed(&self) -> StoreResult<Vec<SignupRecord>> {
        let rows: Vec<PgSignupRow> = sqlx::query_as(
            "select id, email, group_id, state, created_at, expires_at, attempts
             from signups where state = 'confirmed' order by created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SignupRecord::try_from).collect()
    }

    #[tracing::instrument(name = "Sweep expired signups", skip(self))]
    async fn mark_expired_sweep(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("update signups set state = 'expired' where state = 'pending' and expires_at < $1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, FromRow)]
struct PgSignupRow {
    id: String,
    email: String,
    group_id: String,
    state: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    attempts: i32,
}

impl TryFrom<PgSignupRow> for SignupRecord {
    type Error = StoreError;

    fn try_from(row: PgSignupRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.parse().map_err(|_| corrupt("id"))?,
            email: row.email.parse().map_err(|_| corrupt("email"))?,
            group: row.group_id.parse().map_err(|_| corrupt("group_id"))?,
            state: row.state.parse().map_err(|_| corrupt("state"))?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            attempts: row.attempts,
        })
    }
}

fn corrupt(field: &str) -> StoreError {
    StoreError::Corrupt(format!("invalid {} column", field))
}
