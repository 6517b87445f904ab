use dashboard_session::{
    SessionRecord, StoreError, UserProfile, decode_claims, non_blank, normalize_credentials,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::client::{DashboardClient, decode_json_response, new_request_id};
use crate::error::{ApiClientError, request_error};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Snapshot of the locally stored session, for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub username: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub has_refresh_token: bool,
}

impl DashboardClient {
    /// Exchanges username and password for a credential pair and stores it.
    ///
    /// Bypasses 401 recovery: a rejected login is reported as-is.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SessionRecord, ApiClientError> {
        let url = self
            .endpoint(&self.config().login_path)
            .ok_or(ApiClientError::InvalidPath)?;
        let response = self
            .http()
            .post(url)
            .header("x-request-id", new_request_id())
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|error| request_error(&error))?;

        let body: Value = decode_json_response(response).await?;
        let pair = normalize_credentials(&body).map_err(ApiClientError::LoginRejected)?;
        let record = self.store_login(&pair, username)?;

        info!(
            username = record.username.as_deref().unwrap_or(username),
            "signed in"
        );
        Ok(record)
    }

    /// Loads the profile of the signed-in user and caches it in the session record.
    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiClientError> {
        let path = self.config().profile_path.clone();
        let profile: UserProfile = self.get_json(&path).await?;

        let tokens = self.tokens();
        if tokens.credentials().is_some() {
            let mut session = tokens
                .session_data()
                .unwrap_or_else(|| Value::Object(Map::new()));
            let mut record = SessionRecord::default();
            record.apply_profile(&profile);
            record
                .overlay_onto(&mut session)
                .map_err(StoreError::from)?;
            tokens.set_session_data(&session)?;
        }
        Ok(profile)
    }

    /// Forgets the local session and redirects to login. The backend is not called.
    pub fn logout(&self) -> Result<(), ApiClientError> {
        self.tokens().clear_tokens()?;
        info!("signed out");
        self.redirect_to_login();
        Ok(())
    }

    #[must_use]
    pub fn session_status(&self, now_ms: i64) -> SessionStatus {
        let tokens = self.tokens();
        let claims = non_blank(tokens.access_token()).and_then(|token| decode_claims(&token));
        let username = tokens
            .session_record()
            .and_then(|record| record.username)
            .or_else(|| {
                claims
                    .as_ref()
                    .and_then(|claims| claims.display_name().map(str::to_string))
            });

        SessionStatus {
            authenticated: tokens.is_authenticated(now_ms),
            username,
            expires_at_ms: claims.and_then(|claims| claims.expires_at_ms()),
            has_refresh_token: non_blank(tokens.refresh_token()).is_some(),
        }
    }
}
