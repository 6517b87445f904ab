//! Advisory decoding of access-token claims.
//!
//! The claim segment is decoded WITHOUT verifying the signature. The result is
//! only good for display (username) and for estimating expiry so the client can
//! renew ahead of time. It is not an authentication check: the backend verifies
//! every token it receives, and nothing in this crate may treat decoded claims
//! as proof of identity.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::{Map, Value};

/// Default "expiring soon" window used by proactive renewal.
pub const DEFAULT_EXPIRY_THRESHOLD_MINUTES: i64 = 5;

const CLAIMS_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Claims carried in the middle segment of an access token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch.
    pub exp: Option<i64>,
    pub username: Option<String>,
    pub subject: Option<String>,
    pub user_id: Option<String>,
    /// The full claim object, including the fields above.
    pub raw: Map<String, Value>,
}

impl TokenClaims {
    fn from_object(raw: Map<String, Value>) -> Self {
        Self {
            exp: raw.get("exp").and_then(epoch_seconds),
            username: raw.get("username").and_then(scalar_string),
            subject: raw.get("sub").and_then(scalar_string),
            user_id: raw.get("user_id").and_then(scalar_string),
            raw,
        }
    }

    /// Name suitable for display: `username`, falling back to `sub`.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.username.as_deref().or(self.subject.as_deref())
    }

    /// Expiry in milliseconds since the Unix epoch.
    #[must_use]
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.exp.map(|exp| exp.saturating_mul(1000))
    }
}

/// Decodes the claim segment of `token`.
///
/// Returns `None` for anything that is not `<header>.<claims>[.<signature>]`
/// with base64url-encoded UTF-8 JSON object claims.
#[must_use]
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let segment = token.trim().split('.').nth(1)?;
    if segment.is_empty() {
        return None;
    }

    let standard = segment.replace('-', "+").replace('_', "/");
    let bytes = CLAIMS_ENGINE.decode(standard.as_bytes()).ok()?;
    let text = String::from_utf8(bytes).ok()?;

    match serde_json::from_str::<Value>(&text).ok()? {
        Value::Object(raw) => Some(TokenClaims::from_object(raw)),
        _ => None,
    }
}

/// True when the token is unreadable, carries no `exp`, or expires within
/// `threshold_minutes` of `now_ms`.
#[must_use]
pub fn is_expired(token: &str, threshold_minutes: i64, now_ms: i64) -> bool {
    let Some(expires_at_ms) = decode_claims(token).and_then(|claims| claims.expires_at_ms())
    else {
        return true;
    };
    expires_at_ms.saturating_sub(now_ms) <= threshold_minutes.saturating_mul(60_000)
}

/// True when the token's `exp` is strictly after `now_ms`. No threshold.
#[must_use]
pub fn is_live(token: &str, now_ms: i64) -> bool {
    decode_claims(token)
        .and_then(|claims| claims.expires_at_ms())
        .is_some_and(|expires_at_ms| expires_at_ms > now_ms)
}

#[must_use]
pub fn now_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn epoch_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|secs| secs.is_finite()).map(|secs| secs as i64))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
