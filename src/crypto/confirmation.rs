use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::domain::SignupId;

use super::{SigningKey, Token, TokenResult};

/// A confirmation claim bound to exactly one signup record.
///
/// Signing produces the opaque credential embedded in the confirmation link;
/// verifying recovers the signup identity and the expiry it was bound to.
/// Whether that signup is still actionable is the store's call, not the
/// token's.
#[derive(Debug, Serialize, Deserialize)]
pub struct Confirmation(SignupId);

impl From<Confirmation> for SignupId {
    fn from(value: Confirmation) -> SignupId {
        value.0
    }
}

impl From<SignupId> for Confirmation {
    fn from(value: SignupId) -> Self {
        Self(value)
    }
}

impl Confirmation {
    pub fn sign(&self, key: &SigningKey, expires_at: DateTime<Utc>) -> TokenResult<Token> {
        Token::issue(&self.0, expires_at, key.as_ref())
    }

    pub fn verify(key: &SigningKey, token: &str) -> TokenResult<(Self, DateTime<Utc>)> {
        let (id, expires_at) = token.parse::<Token>()?.verify(key.as_ref())?;
        Ok((Self(id), expires_at))
    }
}
