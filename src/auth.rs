use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::{Config, DRIVE_SCOPE};
use crate::error::{ClipError, ClipResult};

/// Refresh this many seconds before the recorded expiry so a credential
/// handed to a long upload does not expire mid-transfer.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Access/refresh token pair authorizing Drive calls on the user's behalf.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl Credential {
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS)
    }

    pub fn is_refreshable(&self) -> bool {
        !self.is_valid() && self.refresh_token.is_some()
    }
}

/// Wire shape of Google's token endpoint responses. Refresh responses omit
/// `refresh_token`, so the prior one is carried over.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: String,
}

impl TokenResponse {
    fn into_credential(self, prior_refresh_token: Option<String>) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(prior_refresh_token),
            expires_at: Utc::now() + ChronoDuration::seconds(self.expires_in),
            scopes: self.scope.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Process-wide credential slot. One identity at a time: storing a new
/// credential replaces whatever was there (last authenticated user wins).
pub struct CredentialStore {
    slot: RwLock<Option<Credential>>,
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl CredentialStore {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        CredentialStore {
            slot: RwLock::new(None),
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    pub async fn store_credential(&self, credential: Credential) {
        *self.slot.write().await = Some(credential);
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }

    /// Returns a credential guaranteed not expired at call time, refreshing
    /// through the token endpoint when the held one is expired but carries a
    /// refresh token. Any refresh failure means the user has to re-authorize,
    /// so it surfaces as `AuthRequired` and is never retried here.
    pub async fn get_valid_credential(&self) -> ClipResult<Credential> {
        let held = self.slot.read().await.clone();
        let credential = held.ok_or_else(|| {
            ClipError::AuthRequired("no credential stored; open /api/login first".to_string())
        })?;

        if credential.is_valid() {
            return Ok(credential);
        }

        let refresh_token = credential.refresh_token.clone().ok_or_else(|| {
            ClipError::AuthRequired("credential expired and no refresh token held".to_string())
        })?;

        debug!("access token expired, refreshing");
        let refreshed = self.refresh(&refresh_token).await?;
        *self.slot.write().await = Some(refreshed.clone());
        info!("credential refreshed, new expiry {}", refreshed.expires_at);
        Ok(refreshed)
    }

    /// Exchange the authorization code from the OAuth callback and store the
    /// resulting credential.
    pub async fn exchange_and_store(&self, code: &str, redirect_uri: &str) -> ClipResult<()> {
        let params = json!({
            "code": code,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "redirect_uri": redirect_uri,
            "grant_type": "authorization_code",
        });

        let token = self.token_request(&params, "code exchange").await?;
        self.store_credential(token.into_credential(None)).await;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> ClipResult<Credential> {
        let params = json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "refresh_token": refresh_token,
            "grant_type": "refresh_token",
        });

        let token = self.token_request(&params, "token refresh").await?;
        Ok(token.into_credential(Some(refresh_token.to_string())))
    }

    async fn token_request(&self, params: &serde_json::Value, what: &str) -> ClipResult<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .json(params)
            .send()
            .await
            .map_err(|e| ClipError::AuthRequired(format!("{what} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClipError::AuthRequired(format!(
                "{what} rejected ({status}): {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ClipError::AuthRequired(format!("{what} returned malformed body: {e}")))
    }
}

/// Consent-screen URL the login route redirects to. `access_type=offline`
/// plus `prompt=consent` makes Google issue a refresh token.
pub fn authorization_url(config: &Config) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        config.auth_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(DRIVE_SCOPE),
    )
}
