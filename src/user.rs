//! User model — anonymous visitors and logged-in members.
//!
//! DESIGN
//! ======
//! The identity endpoint returns a single JSON shape for both kinds of
//! visitor. A body carrying a `providers` field is a logged-in user, anything
//! else is anonymous. `User` turns that structural check into an explicit
//! enum at the deserialization boundary and serializes back to the same
//! untagged shape, so snapshots written by this crate read back unchanged.
//!
//! Fields the endpoint sends that are not modelled here are kept in `extra`
//! and round-trip untouched.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

// =============================================================================
// ACCESS TOKEN
// =============================================================================

/// Short-lived bearer token attached to a logged-in user.
///
/// Never persisted: see [`User::without_token`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub value: String,
    /// Absolute expiry instant. Accepts RFC 3339 text or epoch milliseconds.
    #[serde(with = "expiry")]
    pub expires_in: OffsetDateTime,
}

mod expiry {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawExpiry {
        Text(String),
        Millis(i64),
    }

    pub fn serialize<S: Serializer>(at: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let text = at.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        match RawExpiry::deserialize(deserializer)? {
            RawExpiry::Text(text) => OffsetDateTime::parse(&text, &Rfc3339).map_err(D::Error::custom),
            RawExpiry::Millis(ms) => {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(D::Error::custom)
            }
        }
    }
}

// =============================================================================
// USER VARIANTS
// =============================================================================

/// Unauthenticated visitor. Only the tracking id is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousUser {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnonymousUser {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), extra: Map::new() }
    }
}

/// Logged-in member with at least one linked auth provider record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedUser {
    pub id: String,
    /// Linked auth providers (e.g. `"github"`, `"google"`).
    #[serde(deserialize_with = "null_as_empty")]
    pub providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LoggedUser {
    #[must_use]
    pub fn new(id: impl Into<String>, providers: Vec<String>) -> Self {
        Self {
            id: id.into(),
            providers,
            name: None,
            email: None,
            image: None,
            username: None,
            access_token: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: AccessToken) -> Self {
        self.access_token = Some(token);
        self
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// USER
// =============================================================================

/// Either kind of visitor returned by the identity endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum User {
    Anonymous(AnonymousUser),
    Logged(LoggedUser),
}

impl User {
    /// Tracking identifier, present for both variants.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Anonymous(user) => &user.id,
            Self::Logged(user) => &user.id,
        }
    }

    #[must_use]
    pub fn as_logged(&self) -> Option<&LoggedUser> {
        match self {
            Self::Logged(user) => Some(user),
            Self::Anonymous(_) => None,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.as_logged().and_then(|user| user.access_token.as_ref())
    }

    /// Copy of this user that is safe to write to durable storage.
    #[must_use]
    pub fn without_token(mut self) -> Self {
        if let Self::Logged(user) = &mut self {
            user.access_token = None;
        }
        self
    }
}

impl<'de> Deserialize<'de> for User {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if !value.is_object() {
            return Err(D::Error::custom("user payload must be a JSON object"));
        }
        if value.get("providers").is_some() {
            LoggedUser::deserialize(value).map(Self::Logged).map_err(D::Error::custom)
        } else {
            AnonymousUser::deserialize(value).map(Self::Anonymous).map_err(D::Error::custom)
        }
    }
}

impl From<AnonymousUser> for User {
    fn from(user: AnonymousUser) -> Self {
        Self::Anonymous(user)
    }
}

impl From<LoggedUser> for User {
    fn from(user: LoggedUser) -> Self {
        Self::Logged(user)
    }
}

#[cfg(test)]
#[path = "user_test.rs"]
mod tests;
