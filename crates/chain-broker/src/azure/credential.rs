//! Bearer token cache for Azure Resource Manager calls.
//!
//! Readers take a cheap snapshot of the cached credential. Refreshes go through a
//! single async gate, so callers that arrive while an exchange is in flight wait
//! for it and reuse its result instead of issuing their own.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::environment::Endpoints;
use crate::error::{BrokerError, Result};

/// Treat a token as expired this long before the provider says it is.
const REFRESH_MARGIN_SECS: i64 = 300;

/// An access token and its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    expires_on: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_on,
        }
    }

    /// The raw bearer token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// Whether the token is expired (or about to be) at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) >= self.expires_on
    }

    fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// `expires_on` arrives as a string on the v1 endpoint and as a number elsewhere.
#[derive(Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: EpochSeconds,
}

impl TokenResponse {
    fn into_credential(self) -> Result<Credential> {
        let secs = match self.expires_on {
            EpochSeconds::Number(n) => n,
            EpochSeconds::Text(s) => s.trim().parse().map_err(|e| {
                BrokerError::Auth(format!("invalid expires_on {s:?} in token response: {e}"))
            })?,
        };
        let expires_on = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            BrokerError::Auth(format!("expires_on {secs} is out of range"))
        })?;
        Ok(Credential::new(self.access_token, expires_on))
    }
}

/// Cached entry tagged with a generation so forced refreshes can tell whether
/// somebody else already replaced the token they were unhappy with.
type Slot = Option<(u64, Arc<Credential>)>;

/// Client-credential token cache.
pub struct CredentialCache {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    resource: String,
    slot: RwLock<Slot>,
    refresh_gate: Mutex<()>,
}

impl CredentialCache {
    /// Create a cache that exchanges the service principal's secret at the
    /// identity endpoint described by `endpoints`.
    pub fn new(
        http: Client,
        endpoints: &Endpoints,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: endpoints.token_url(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            resource: endpoints.token_resource.clone(),
            slot: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Slot {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, credential: Arc<Credential>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let generation = slot.as_ref().map_or(0, |(g, _)| g + 1);
        *slot = Some((generation, credential));
    }

    /// Return a usable token, exchanging credentials if the cache is empty,
    /// expired, or `force_refresh` is set.
    ///
    /// # Errors
    /// Returns [`BrokerError::Auth`] when the identity exchange fails.
    pub async fn get_token(&self, force_refresh: bool) -> Result<Arc<Credential>> {
        let observed = self.snapshot();
        if !force_refresh {
            if let Some((_, credential)) = &observed {
                if !credential.is_expired() {
                    return Ok(Arc::clone(credential));
                }
            }
        }

        let _gate = self.refresh_gate.lock().await;

        if let Some((generation, credential)) = self.snapshot() {
            let replaced = observed.as_ref().map(|(g, _)| *g) != Some(generation);
            if !credential.is_expired() && (!force_refresh || replaced) {
                debug!("Reusing credential refreshed by a concurrent caller");
                return Ok(credential);
            }
        }

        let credential = Arc::new(self.exchange().await?);
        info!(expires_on = %credential.expires_on(), "Acquired management token");
        self.store(Arc::clone(&credential));
        Ok(credential)
    }

    async fn exchange(&self) -> Result<Credential> {
        debug!(url = %self.token_url, "Requesting client credential token");

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("resource", self.resource.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BrokerError::Auth(format!("identity endpoint unreachable: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BrokerError::Auth(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Identity endpoint rejected credential grant");
            return Err(BrokerError::Auth(format!(
                "identity endpoint returned {}: {text}",
                status.as_u16()
            )));
        }

        serde_json::from_str::<TokenResponse>(&text)
            .map_err(|e| BrokerError::Auth(format!("unparseable token response: {e}")))?
            .into_credential()
    }
}
