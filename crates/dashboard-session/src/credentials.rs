use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const SUCCESS_STATUS: &str = "success";

/// Access and refresh token, always stored and replaced together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"***")
            .field("refresh", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialShapeError {
    #[error("credential response reported status `{0}`")]
    UnsuccessfulStatus(String),
    #[error("credential response shape not recognized")]
    UnrecognizedShape,
}

/// Extracts the credential pair from a login or refresh response.
///
/// Accepted shapes: `{access, refresh}`, `{status: "success", data: {access,
/// refresh}}`, and `{data: {data: {access, refresh}}}`.
pub fn normalize_credentials(body: &Value) -> Result<CredentialPair, CredentialShapeError> {
    if let Some(status) = body.get("status").and_then(Value::as_str)
        && status != SUCCESS_STATUS
    {
        return Err(CredentialShapeError::UnsuccessfulStatus(status.to_string()));
    }

    let data = body.get("data");
    let nested = data.and_then(|data| data.get("data"));

    [Some(body), data, nested]
        .into_iter()
        .flatten()
        .find_map(pair_at)
        .ok_or(CredentialShapeError::UnrecognizedShape)
}

fn pair_at(value: &Value) -> Option<CredentialPair> {
    let access = non_empty_str(value.get("access")?)?;
    let refresh = non_empty_str(value.get("refresh")?)?;
    Some(CredentialPair::new(access, refresh))
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|text| !text.is_empty())
}
