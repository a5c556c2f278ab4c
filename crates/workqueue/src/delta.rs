//! Delta encoding.
//!
//! A change notification is reduced to an [`ActionTag`] and a [`ResourceKey`]
//! and carried through the queue as a single [`WorkToken`] of the form
//! `<Action>:<namespace>/<name>`, for example `Added:default/nginx`.
//!
//! The token format is internal to the queue. Callers only go through
//! [`encode`] and [`decode`], so the representation can change without
//! touching the workers or the event handlers.

use crate::error::DecodeError;
use std::fmt;
use std::str::FromStr;

/// Separator between the action and the key inside a token.
pub const DELIMITER: char = ':';

/// Why a key was put on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTag {
    /// Object seen for the first time
    Added,
    /// Object already cached and changed
    Updated,
    /// Object removed
    Deleted,
}

impl ActionTag {
    /// All actions, in declaration order.
    pub const ALL: [ActionTag; 3] = [ActionTag::Added, ActionTag::Updated, ActionTag::Deleted];

    /// Wire name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ActionTag::Added => "Added",
            ActionTag::Updated => "Updated",
            ActionTag::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionTag {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Added" => Ok(ActionTag::Added),
            "Updated" => Ok(ActionTag::Updated),
            "Deleted" => Ok(ActionTag::Deleted),
            other => Err(DecodeError::UnknownAction(other.to_string())),
        }
    }
}

/// Identity of a watched object: `namespace/name`, or `name` when the object
/// is cluster-scoped.
///
/// The key may itself contain `:`; only the first delimiter in a token
/// separates the action from the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Builds a key from an optional namespace and a name.
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self(format!("{}/{}", ns, name)),
            _ => Self(name.to_string()),
        }
    }

    /// Namespace part of the key, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }

    /// Name part of the key.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for ResourceKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Encoded `(ActionTag, ResourceKey)` as it travels through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkToken(String);

impl WorkToken {
    /// Wraps a raw token without validating it.
    ///
    /// Only useful for feeding hand-written tokens to a queue; [`encode`] is
    /// the normal way to build one.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key portion of the token, used for deduplication.
    ///
    /// Falls back to the whole token when there is no delimiter, so malformed
    /// tokens still dedup against themselves.
    #[must_use]
    pub fn key_part(&self) -> &str {
        self.0
            .split_once(DELIMITER)
            .map_or(self.0.as_str(), |(_, key)| key)
    }
}

impl fmt::Display for WorkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes an action and a key into a queue token.
#[must_use]
pub fn encode(action: ActionTag, key: &ResourceKey) -> WorkToken {
    WorkToken(format!("{}{}{}", action, DELIMITER, key))
}

/// Decodes a queue token back into its action and key.
///
/// The action ends at the first delimiter; everything after it is the key.
/// Fails if either part is empty or the action is unknown.
pub fn decode(token: &WorkToken) -> Result<(ActionTag, ResourceKey), DecodeError> {
    let raw = token.as_str();
    let Some((action, key)) = raw.split_once(DELIMITER) else {
        return Err(DecodeError::MissingDelimiter(raw.to_string()));
    };
    if action.is_empty() || key.is_empty() {
        return Err(DecodeError::EmptyField(raw.to_string()));
    }
    let action = action.parse::<ActionTag>()?;
    Ok((action, ResourceKey::from(key)))
}
