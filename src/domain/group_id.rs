use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Identifier of a target mailing list, e.g. `eng-list@example.com`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct GroupId(String);

impl FromStr for GroupId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err("Group identifier cannot be empty".into());
        }

        Ok(Self(value.to_string()))
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Operator-configured set of groups eligible for self-service signup.
/// Requests for any other group are rejected before a record or token exists.
#[derive(Debug, Clone)]
pub struct Whitelist(HashSet<GroupId>);

impl Whitelist {
    pub fn new(groups: impl IntoIterator<Item = GroupId>) -> Self {
        Self(groups.into_iter().collect())
    }

    pub fn contains(&self, group: &GroupId) -> bool {
        self.0.contains(group)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupId> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
