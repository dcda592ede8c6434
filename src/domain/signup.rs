use std::fmt;
use std::str::FromStr;

use base64::{
    alphabet,
    engine::{self, general_purpose},
    Engine as _,
};

use serde::{Deserialize, Serialize};

use sha2::{Digest, Sha256};

use super::{EmailAddress, GroupId};

lazy_static::lazy_static! {
    static ref BASE64_ENGINE: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);
}

/// Deterministic identity of one (email, group) signup attempt.
///
/// Derived by hashing the normalized address and the group identifier, so a
/// repeated request maps to the same stored record instead of a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignupId(String);

impl SignupId {
    pub fn derive(email: &EmailAddress, group: &GroupId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(email.as_ref().as_bytes());
        // Separator keeps ("a@b.c", "d") and ("a@b.cd", "") distinct
        hasher.update(b"\n");
        hasher.update(group.as_ref().as_bytes());

        Self(BASE64_ENGINE.encode(hasher.finalize()))
    }
}

impl AsRef<str> for SignupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SignupId {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(value.to_string()))
    }
}

impl fmt::Display for SignupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a signup record.
///
/// `Applied`, `Expired` and `Failed` are terminal: no operation mutates a
/// record once it reaches one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignupState {
    /// Confirmation email sent, waiting for the owner to click the link
    Pending,
    /// Link clicked, directory membership not yet applied
    Confirmed,
    /// Address added to the group
    Applied,
    /// Confirmation window elapsed without a click
    Expired,
    /// Directory rejected the membership change permanently
    Failed,
}

impl SignupState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Expired | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Applied => "applied",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SignupState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "applied" => Ok(Self::Applied),
            "expired" => Ok(Self::Expired),
            "failed" => Ok(Self::Failed),
            other => Err(format!("{} is not a valid signup state", other)),
        }
    }
}

impl fmt::Display for SignupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
