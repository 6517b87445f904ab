//! Shared HTTP client for every dashboard API call.
//!
//! Outbound, each request carries the stored access token as a bearer
//! credential. Inbound, a 401 triggers at most one session recovery and one
//! replay of the request; concurrent 401s share a single refresh call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashboard_session::{
    CredentialPair, SessionRecord, SingleFlight, StoreError, TokenStore, decode_claims, non_blank,
    normalize_credentials,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, normalize_base_url};
use crate::error::{ApiClientError, RefreshError, body_excerpt, format_http_error, request_error};
use crate::redirect::{LoginRedirect, TracingRedirect};

const REQUEST_ID_HEADER: &str = "x-request-id";
const JSON_MEDIA_TYPE: &str = "application/json";

#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub refresh: &'a str,
    pub refresh_lifetime: &'a str,
}

#[derive(Debug, Clone)]
pub struct DashboardClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    base_url: String,
    http: reqwest::Client,
    tokens: TokenStore,
    refresh: SingleFlight<CredentialPair, RefreshError>,
    /// Highest refresh flight whose failure already ended the session.
    ended_flight: AtomicU64,
    redirect: Arc<dyn LoginRedirect>,
}

impl DashboardClient {
    pub fn new(config: ClientConfig, tokens: TokenStore) -> Result<Self, ApiClientError> {
        Self::with_redirect(config, tokens, Arc::new(TracingRedirect))
    }

    pub fn with_redirect(
        config: ClientConfig,
        tokens: TokenStore,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Result<Self, ApiClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| ApiClientError::ClientBuild {
                message: error.to_string(),
            })?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                base_url,
                http,
                tokens,
                refresh: SingleFlight::new(),
                ended_flight: AtomicU64::new(0),
                redirect,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout()
    }

    /// A refresh call is currently outstanding.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_in_flight()
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.inner.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.inner.base_url, trimmed))
        }
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(Method::GET, path, None).await?;
        decode_json_response(response).await
    }

    pub async fn get_optional_json<T>(&self, path: &str) -> Result<Option<T>, ApiClientError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(Method::GET, path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode_json_response(response).await.map(Some)
    }

    pub async fn post_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<Res, ApiClientError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_json(Method::POST, path, payload).await
    }

    pub async fn put_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<Res, ApiClientError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_json(Method::PUT, path, payload).await
    }

    pub async fn patch_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<Res, ApiClientError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_json(Method::PATCH, path, payload).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiClientError> {
        let response = self.send(Method::DELETE, path, None).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response
            .bytes()
            .await
            .map_err(|error| ApiClientError::Read {
                message: error.to_string(),
            })?;
        Err(format_http_error(status, &body))
    }

    async fn send_json<Req, Res>(
        &self,
        method: Method,
        path: &str,
        payload: &Req,
    ) -> Result<Res, ApiClientError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload).map_err(|error| ApiClientError::Encode {
            message: error.to_string(),
        })?;
        let response = self.send(method, path, Some(body)).await?;
        decode_json_response(response).await
    }

    /// Sends an authenticated request, recovering once from a 401.
    ///
    /// The returned response may still be a 401 if the replayed request was
    /// rejected too; it is never replayed a second time.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response, ApiClientError> {
        let url = self.endpoint(path).ok_or(ApiClientError::InvalidPath)?;
        let sent_with = non_blank(self.inner.tokens.access_token());

        let response = self
            .dispatch(&method, &url, body.as_deref(), sent_with.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(%method, path, "request unauthorized; recovering session");
        let access = self.recover_session(sent_with.as_deref()).await?;
        self.dispatch(&method, &url, body.as_deref(), Some(&access))
            .await
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        body: Option<&[u8]>,
        bearer: Option<&str>,
    ) -> Result<Response, ApiClientError> {
        let mut request = self
            .inner
            .http
            .request(method.clone(), url)
            .header(REQUEST_ID_HEADER, new_request_id())
            .header(ACCEPT, JSON_MEDIA_TYPE);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, JSON_MEDIA_TYPE).body(body.to_vec());
        }

        request.send().await.map_err(|error| request_error(&error))
    }

    /// Produces an access token to replay a rejected request with.
    async fn recover_session(&self, sent_with: Option<&str>) -> Result<String, ApiClientError> {
        let tokens = &self.inner.tokens;
        let Some(refresh_token) = non_blank(tokens.refresh_token()) else {
            self.end_session("no refresh token stored");
            return Err(ApiClientError::SessionExpired);
        };

        if let Some(current) = non_blank(tokens.access_token())
            && sent_with != Some(current.as_str())
        {
            debug!("access token rotated while the request was in flight; replaying");
            return Ok(current);
        }

        let client = self.clone();
        let (flight, outcome) = self
            .inner
            .refresh
            .run_numbered(move || async move {
                client.request_new_credentials(refresh_token).await
            })
            .await;

        match outcome {
            Ok(pair) => Ok(pair.access),
            Err(error) => {
                // Every 401 waiter sees the failure; only the first ends the session.
                if error != RefreshError::Abandoned
                    && self.inner.ended_flight.fetch_max(flight, Ordering::SeqCst) < flight
                {
                    self.end_session(&error.to_string());
                }
                Err(ApiClientError::RefreshFailed(error))
            }
        }
    }

    /// Refreshes the credential pair without touching the session on failure.
    ///
    /// Joins an in-flight refresh instead of starting a second one.
    pub async fn refresh_session(&self) -> Result<CredentialPair, RefreshError> {
        let refresh_token =
            non_blank(self.inner.tokens.refresh_token()).ok_or(RefreshError::MissingRefreshToken)?;
        let client = self.clone();
        self.inner
            .refresh
            .run(move || async move { client.request_new_credentials(refresh_token).await })
            .await
    }

    async fn request_new_credentials(
        &self,
        refresh_token: String,
    ) -> Result<CredentialPair, RefreshError> {
        let config = &self.inner.config;
        let url = self
            .endpoint(&config.refresh_path)
            .ok_or_else(|| RefreshError::Request {
                message: "refresh path is empty".to_string(),
            })?;
        let payload = RefreshTokenRequest {
            refresh: &refresh_token,
            refresh_lifetime: &config.refresh_lifetime,
        };

        debug!(path = %config.refresh_path, "requesting new credentials");
        let response = self
            .inner
            .http
            .post(url)
            .header(REQUEST_ID_HEADER, new_request_id())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    RefreshError::Timeout
                } else {
                    RefreshError::Request {
                        message: error.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| RefreshError::Request {
                message: error.to_string(),
            })?;
        if !status.is_success() {
            return Err(RefreshError::Http {
                status,
                body: body_excerpt(&bytes),
            });
        }

        let body = serde_json::from_slice::<Value>(&bytes).map_err(|error| {
            RefreshError::Decode {
                message: error.to_string(),
            }
        })?;
        let pair = normalize_credentials(&body)?;
        self.store_refreshed(&pair)
            .map_err(|error| RefreshError::Store {
                message: error.to_string(),
            })?;

        info!("session credentials refreshed");
        Ok(pair)
    }

    /// Stores the new pair, overlaying the new claims on the cached session
    /// without dropping anything already stored there.
    fn store_refreshed(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let tokens = &self.inner.tokens;
        let mut session = tokens
            .session_data()
            .unwrap_or_else(|| Value::Object(Map::new()));
        if let Some(claims) = decode_claims(&pair.access) {
            SessionRecord::from_claims(&claims).overlay_onto(&mut session)?;
        }
        tokens.set_tokens(&pair.access, &pair.refresh, Some(&session))
    }

    pub(crate) fn store_login(
        &self,
        pair: &CredentialPair,
        username: &str,
    ) -> Result<SessionRecord, StoreError> {
        let mut record = decode_claims(&pair.access)
            .map(|claims| SessionRecord::from_claims(&claims))
            .unwrap_or_default();
        if record.username.is_none() {
            record.username = Some(username.to_string());
        }
        self.inner.tokens.set_credentials(pair, Some(&record))?;
        Ok(record)
    }

    /// Clears every stored credential and sends the operator to login.
    pub(crate) fn end_session(&self, reason: &str) {
        warn!(reason, "ending session");
        if let Err(error) = self.inner.tokens.clear_tokens() {
            warn!(%error, "failed to clear session store");
        }
        self.redirect_to_login();
    }

    pub(crate) fn redirect_to_login(&self) {
        self.inner
            .redirect
            .redirect_to_login(&self.inner.config.login_redirect_path);
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }
}

pub(crate) fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

pub(crate) async fn decode_json_response<T>(response: Response) -> Result<T, ApiClientError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ApiClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    let decoded = if bytes.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value::<T>(Value::Null)
    } else {
        serde_json::from_slice::<T>(&bytes)
    };
    decoded.map_err(|error| ApiClientError::Decode {
        message: error.to_string(),
    })
}
