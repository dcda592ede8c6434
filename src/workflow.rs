use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use url::Url;

use crate::client::{DirectoryClient, DirectoryError, Notifier};
use crate::crypto::{Confirmation, SigningKey, Token, TokenError};
use crate::domain::{EmailAddress, GroupId, SignupId, SignupState, Whitelist};
use crate::repo::{SignupRecord, SignupStore, StoreError};

/// Errors surfaced by the workflow engine.
///
/// Token and whitelist rejections map to client errors; retryable external
/// failures leave the record in a resumable state, permanent ones settle it
/// as `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum SignupError {
    #[error("Group is not eligible for self-service signup")]
    NotWhitelisted,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("No signup record for this confirmation")]
    NotFound,
    #[error("Signup confirmation window has elapsed")]
    AlreadyExpired,
    #[error("Signup is already settled")]
    AlreadyTerminal,
    #[error("Failed to issue confirmation token")]
    IssueToken(#[source] TokenError),
    #[error("Failed to send confirmation email")]
    Notifier(#[source] anyhow::Error),
    #[error("Directory change failed, a retry may succeed")]
    RetryableExternalFailure(#[source] DirectoryError),
    #[error("Directory change failed permanently")]
    PermanentExternalFailure(#[source] DirectoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a subscription request.
///
/// Deliberately uniform for created and reused records: the engine never
/// consults the directory here, so the response cannot reveal whether the
/// address already belongs to the group.
#[derive(Debug)]
pub struct RequestOutcome {
    pub signup_id: SignupId,
    /// False when an identical request was already pending and the email was
    /// suppressed rather than re-sent
    pub email_sent: bool,
}

/// Result of a successful confirmation call.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The membership change is applied (by this call or a racing one that
    /// this call observed as already done)
    Applied,
    /// A concurrent confirmation won the pending-to-confirmed transition;
    /// idempotent success for this caller
    AlreadyConfirmed,
}

/// Orchestrates the signup state machine.
///
/// ```text
/// Pending   --confirm--> Confirmed --add ok--> Applied
/// Pending   --overdue--> Expired
/// Confirmed --add permanent failure--> Failed
/// ```
///
/// The engine holds no mutable state of its own; every state decision is
/// delegated to the store's atomic primitives, so any number of engine
/// instances can run against the same store.
pub struct WorkflowEngine {
    store: Arc<dyn SignupStore>,
    directory: Arc<dyn DirectoryClient>,
    notifier: Arc<dyn Notifier>,
    signing_key: SigningKey,
    whitelist: Whitelist,
    ttl: Duration,
    public_url: Url,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn SignupStore>,
        directory: Arc<dyn DirectoryClient>,
        notifier: Arc<dyn Notifier>,
        signing_key: SigningKey,
        whitelist: Whitelist,
        ttl: Duration,
        public_url: Url,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            signing_key,
            whitelist,
            ttl,
            public_url,
        }
    }

    /// Start (or resume) a signup: validate the group, create or reuse the
    /// pending record, and send the confirmation email.
    ///
    /// A repeated identical request within the TTL reuses the existing record
    /// and suppresses the email unless `resend` is set. A notifier failure is
    /// surfaced but leaves the record pending so a resend can follow.
    #[tracing::instrument(name = "Request subscription", skip(self, email), fields(group = %group))]
    pub async fn request_subscription(
        &self,
        email: EmailAddress,
        group: GroupId,
        resend: bool,
    ) -> Result<RequestOutcome, SignupError> {
        if !self.whitelist.contains(&group) {
            tracing::info!(%group, "Rejected signup for non-whitelisted group");
            return Err(SignupError::NotWhitelisted);
        }

        let candidate = SignupRecord::pending(email, group, self.ttl);
        let (record, created) = self.store.get_or_create(candidate.clone()).await?;

        // A stale pending record the sweep has not reached yet is dead: expire
        // it on the spot and start over with the fresh candidate
        let (record, created) = if !created
            && record.state == SignupState::Pending
            && record.is_expired_at(Utc::now())
        {
            self.store
                .compare_and_transition(&record.id, SignupState::Pending, SignupState::Expired)
                .await?;
            self.store.get_or_create(candidate).await?
        } else {
            (record, created)
        };

        if !created && !resend {
            tracing::info!(id = %record.id, "Signup already pending, suppressing duplicate email");
            return Ok(RequestOutcome {
                signup_id: record.id,
                email_sent: false,
            });
        }

        let token = Confirmation::from(record.id.clone())
            .sign(&self.signing_key, record.expires_at)
            .map_err(SignupError::IssueToken)?;
        let link = self.confirmation_link(&token)?;

        self.notifier
            .send_confirmation(&record.email, &record.group, &link)
            .await
            .map_err(SignupError::Notifier)?;

        Ok(RequestOutcome {
            signup_id: record.id,
            email_sent: true,
        })
    }

    /// Settle a clicked confirmation link: verify the token, advance the
    /// record, and apply the membership change to the directory.
    #[tracing::instrument(name = "Confirm subscription", skip_all)]
    pub async fn confirm_subscription(&self, token: &str) -> Result<ConfirmOutcome, SignupError> {
        let (confirmation, _expires_at) = Confirmation::verify(&self.signing_key, token)?;
        let id = SignupId::from(confirmation);

        let record = self.store.get(&id).await?.ok_or(SignupError::NotFound)?;

        match record.state {
            // Terminal records are never touched, not even their attempt counter
            SignupState::Expired => Err(SignupError::AlreadyExpired),
            SignupState::Applied | SignupState::Failed => Err(SignupError::AlreadyTerminal),
            SignupState::Pending => {
                self.store.record_attempt(&id).await?;
                if record.is_expired_at(Utc::now()) {
                    self.store
                        .compare_and_transition(&id, SignupState::Pending, SignupState::Expired)
                        .await?;
                    return Err(SignupError::AlreadyExpired);
                }
                let advanced = self
                    .store
                    .compare_and_transition(&id, SignupState::Pending, SignupState::Confirmed)
                    .await?;
                if !advanced {
                    // A concurrent confirmation won the transition; this
                    // caller is done without touching the directory
                    return Ok(ConfirmOutcome::AlreadyConfirmed);
                }
                self.apply(&record).await
            }
            // A previous attempt confirmed but failed retryably against the
            // directory; re-enter the membership change
            SignupState::Confirmed => {
                self.store.record_attempt(&id).await?;
                self.apply(&record).await
            }
        }
    }

    /// Transition every overdue pending record to `Expired`
    #[tracing::instrument(name = "Sweep expired signups", skip(self))]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, SignupError> {
        let swept = self.store.mark_expired_sweep(now).await?;
        if swept > 0 {
            tracing::info!(swept, "Expired overdue signups");
        }
        Ok(swept)
    }

    /// Re-drive every confirmed-but-unapplied record through the directory,
    /// returning how many were applied.
    ///
    /// This is the token-free retry path: once the owner has clicked the
    /// link, a directory outage resolves here without further user action,
    /// even after the confirmation token itself has expired. `Confirmed`
    /// records have no expiry of their own, so nothing is skipped.
    #[tracing::instrument(name = "Commit confirmed signups", skip(self))]
    pub async fn commit_confirmed(&self) -> Result<u64, SignupError> {
        let mut committed = 0;
        for record in self.store.list_confirmed().await? {
            match self.apply(&record).await {
                Ok(_) => committed += 1,
                // Already logged and, for permanent failures, settled by
                // apply; retryable ones wait for the next pass
                Err(SignupError::RetryableExternalFailure(_))
                | Err(SignupError::PermanentExternalFailure(_)) => {}
                Err(err) => return Err(err),
            }
        }
        if committed > 0 {
            tracing::info!(committed, "Committed confirmed signups");
        }
        Ok(committed)
    }

    async fn apply(&self, record: &SignupRecord) -> Result<ConfirmOutcome, SignupError> {
        match self.directory.add_member(&record.group, &record.email).await {
            Ok(()) => {
                // A false return means a racing confirmation already settled
                // the record after its own successful add; same outcome
                self.store
                    .compare_and_transition(&record.id, SignupState::Confirmed, SignupState::Applied)
                    .await?;
                tracing::info!(id = %record.id, group = %record.group, "Signup applied");
                Ok(ConfirmOutcome::Applied)
            }
            Err(err @ DirectoryError::Retryable(_)) => {
                tracing::warn!(id = %record.id, error = %err, "Directory add failed, leaving signup confirmed for retry");
                Err(SignupError::RetryableExternalFailure(err))
            }
            Err(err @ DirectoryError::Permanent(_)) => {
                self.store
                    .compare_and_transition(&record.id, SignupState::Confirmed, SignupState::Failed)
                    .await?;
                tracing::error!(id = %record.id, error = %err, "Directory add failed permanently, signup marked failed");
                Err(SignupError::PermanentExternalFailure(err))
            }
        }
    }

    fn confirmation_link(&self, token: &Token) -> Result<Url, SignupError> {
        self.public_url
            .join(&format!("signups/confirm/{}", token.as_ref()))
            .map_err(|_| SignupError::IssueToken(TokenError::Malformed))
    }
}
