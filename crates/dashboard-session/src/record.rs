use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::codec::TokenClaims;

/// Cached view of the signed-in user, persisted next to the credentials.
///
/// Never authoritative: it can always be rebuilt from the access-token claims
/// or a profile fetch. Fields written by other tooling are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        rename = "userId",
        alias = "user_id",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response body of the profile endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "required_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl SessionRecord {
    #[must_use]
    pub fn from_claims(claims: &TokenClaims) -> Self {
        let mut record = Self::default();
        record.merge_claims(claims);
        record
    }

    /// Overlays identity claims, keeping profile fields already cached.
    pub fn merge_claims(&mut self, claims: &TokenClaims) {
        if let Some(name) = claims.display_name() {
            self.username = Some(name.to_string());
        }
        if let Some(user_id) = claims.user_id.as_ref() {
            self.user_id = Some(user_id.clone());
        }
    }

    pub fn apply_profile(&mut self, profile: &UserProfile) {
        self.user_id = Some(profile.id.clone());
        self.username = Some(profile.username.clone());
        self.first_name.clone_from(&profile.first_name);
        self.last_name.clone_from(&profile.last_name);
        self.email.clone_from(&profile.email);
        self.is_active = profile.is_active;
    }

    /// Writes the populated fields of this record into a stored session
    /// value, keeping every other key (and the key spelling already in use
    /// for the user id). A non-object value is replaced by an object.
    pub fn overlay_onto(&self, session: &mut Value) -> Result<(), serde_json::Error> {
        let Value::Object(patch) = serde_json::to_value(self)? else {
            return Ok(());
        };
        if !session.is_object() {
            *session = Value::Object(Map::new());
        }
        let Value::Object(target) = session else {
            return Ok(());
        };

        for (key, value) in patch {
            let key = if key == "userId"
                && !target.contains_key("userId")
                && target.contains_key("user_id")
            {
                "user_id".to_string()
            } else {
                key
            };
            target.insert(key, value);
        }
        Ok(())
    }

    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        let parts = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
