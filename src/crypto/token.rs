use std::str::FromStr;

use hmac::Mac;

use serde::{Deserialize, Serialize};

use chrono::{DateTime, TimeZone, Utc};

use uuid::Uuid;

use base64::{
    alphabet,
    engine::{self, general_purpose},
    Engine as _,
};

lazy_static::lazy_static! {
    // Base64 engine for the URL-safe token wire format
    static ref BASE64_ENGINE: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);
}

/// Various errors that can occur when handling tokens.
///
/// Deliberately payload-free: a verification failure must not echo back any
/// part of the token or the expected signature.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token signature does not match")]
    InvalidSignature,
    #[error("Token is expired")]
    Expired,
    #[error("Token could not be decoded")]
    Malformed,
}

impl From<std::str::Utf8Error> for TokenError {
    fn from(_e: std::str::Utf8Error) -> Self {
        Self::Malformed
    }
}

impl From<serde_json::Error> for TokenError {
    fn from(_e: serde_json::Error) -> Self {
        Self::Malformed
    }
}

impl From<base64::DecodeError> for TokenError {
    fn from(_e: base64::DecodeError) -> Self {
        Self::Malformed
    }
}

/// Wrapper for token results
pub type TokenResult<T> = Result<T, TokenError>;

/// A serialized, cryptographically-signed, expiring token.
///
/// Wire format is `base64url(message).base64url(signature)` where the message
/// is a JSON object carrying the expiry, a random nonce and the payload. The
/// nonce keeps two issuances for the same payload from being bit-identical.
#[derive(Debug, Clone, PartialEq)]
pub struct Token(String);

impl Token {
    /// Sign a payload into a token that stops verifying at `expires_at`
    pub fn issue<T, K>(payload: T, expires_at: DateTime<Utc>, key: &K) -> TokenResult<Token>
    where
        T: Serialize,
        K: Mac + Clone,
    {
        let msg = TokenMessage {
            exp: expires_at.timestamp(),
            nonce: Uuid::new_v4(),
            data: payload,
        };
        let msg = serde_json::to_string(&msg)?;
        let sig = sign_message(key, msg.as_bytes());

        let msg = BASE64_ENGINE.encode(msg);
        let sig = BASE64_ENGINE.encode(sig);

        Ok(Token(format!("{}.{}", msg, sig)))
    }

    /// Verify the token and deconstruct it into the payload and its expiry.
    ///
    /// Pure: performs no lookups and consults only the key and the clock.
    /// The signature is checked before the message is parsed, so a forged
    /// token fails with `InvalidSignature` rather than a parse error.
    pub fn verify<T, K>(&self, key: &K) -> TokenResult<(T, DateTime<Utc>)>
    where
        T: for<'de> Deserialize<'de>,
        K: Mac + Clone,
    {
        let (msg, sig) = self.split().ok_or(TokenError::Malformed)?;
        let msg = BASE64_ENGINE.decode(msg)?;
        let sig = BASE64_ENGINE.decode(sig)?;

        verify_message(key, &msg, &sig)?;

        let msg = std::str::from_utf8(&msg)?;
        let msg: TokenMessage<T> = serde_json::from_str(msg)?;

        // Ambiguous timestamps resolve to the earliest instant, which can
        // only shorten a token's life, never extend it
        let expires_at = Utc
            .timestamp_opt(msg.exp, 0u32)
            .earliest()
            .ok_or(TokenError::Malformed)?;
        if Utc::now() >= expires_at {
            return Err(TokenError::Expired);
        }

        Ok((msg.data, expires_at))
    }

    fn split(&self) -> Option<(&str, &str)> {
        let mut matches = self.0.splitn(2, '.');
        let msg = matches.next()?;
        let sig = matches.next()?;
        Some((msg, sig))
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Token {
    type Err = TokenError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Ok(Self(token.to_string()))
    }
}

/// Serializable structure for token messages
#[derive(Debug, Serialize, Deserialize)]
struct TokenMessage<T> {
    exp: i64,
    nonce: Uuid,
    data: T,
}

fn sign_message<K>(key: &K, msg: &[u8]) -> Vec<u8>
where
    K: Mac + Clone,
{
    let key = key.clone();
    key.chain_update(msg).finalize().into_bytes().to_vec()
}

/// Verify a signed message with a key, in constant time
fn verify_message<K>(key: &K, msg: &[u8], signature: &[u8]) -> TokenResult<()>
where
    K: Mac + Clone,
{
    let key = key.clone();
    key.chain_update(msg)
        .verify_slice(signature)
        .map_err(|_| TokenError::InvalidSignature)
}
