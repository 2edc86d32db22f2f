//! OAuth2 client-credentials tokens for Microsoft Graph.
//!
//! Tokens are cached and refreshed once less than [`REFRESH_MARGIN`] of
//! their lifetime remains, so a request never starts with a token that is
//! about to expire.

use std::time::{Duration, Instant};

use docsync_core::ProviderError;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::http;

pub const REFRESH_MARGIN: Duration = Duration::from_secs(300);
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct TokenProvider {
    client: reqwest::Client,
    token_url: String,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: reqwest::Client, authority_url: &str, credentials: Credentials) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority_url.trim_end_matches('/'),
            credentials.tenant_id
        );
        Self {
            client,
            token_url,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// A bearer token valid for at least [`REFRESH_MARGIN`].
    pub async fn token(&self) -> Result<String, ProviderError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
            debug!("access token near expiry; refreshing");
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch(&self) -> Result<CachedToken, ProviderError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(http::transport_error)?;

        // The token endpoint answers bad credentials with 400, 401 or 403.
        let response = match http::check(response).await {
            Ok(r) => r,
            Err(ProviderError::Client { status, message }) => {
                return Err(ProviderError::Auth(format!("HTTP {}: {}", status, message)));
            }
            Err(ProviderError::Forbidden(message)) => {
                return Err(ProviderError::Auth(format!("HTTP 403: {}", message)));
            }
            Err(e) => return Err(e),
        };

        let body: TokenResponse = response.json().await.map_err(http::transport_error)?;
        info!(expires_in = body.expires_in, "acquired Graph access token");
        Ok(CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }
}
