// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure Active Directory token acquisition.
//!
//! The controller authenticates to the Azure Resource Manager API with the
//! OAuth2 client-credentials flow. Credentials come from the conventional
//! `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` / `AZURE_CLIENT_SECRET` environment
//! variables, and tokens are cached until shortly before expiry.

use crate::azure::errors::CloudError;
use crate::constants::{AZURE_LOGIN_BASE_URL, AZURE_MANAGEMENT_SCOPE};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Seconds subtracted from a token's lifetime before it is considered stale.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Source of bearer tokens for the Azure Resource Manager API.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Return a bearer token valid for the ARM scope.
    async fn token(&self) -> Result<String, CloudError>;
}

/// AAD token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Client-credentials flow against AAD with an in-memory token cache.
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    login_base_url: String,
    http: HttpClient,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientSecretCredential {
    /// Create a credential from explicit values.
    #[must_use]
    pub fn new(tenant_id: String, client_id: String, client_secret: String) -> Self {
        Self {
            tenant_id,
            client_id,
            client_secret,
            login_base_url: AZURE_LOGIN_BASE_URL.to_string(),
            http: HttpClient::new(),
            cached: Mutex::new(None),
        }
    }

    /// Create a credential from the conventional `AZURE_*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing variable.
    pub fn from_env() -> anyhow::Result<Self> {
        let read = |name: &str| {
            std::env::var(name).map_err(|_| anyhow::anyhow!("{name} environment variable is not set"))
        };
        Ok(Self::new(
            read("AZURE_TENANT_ID")?,
            read("AZURE_CLIENT_ID")?,
            read("AZURE_CLIENT_SECRET")?,
        ))
    }

    async fn request_token(&self) -> Result<CachedToken, CloudError> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base_url, self.tenant_id
        );
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", AZURE_MANAGEMENT_SCOPE),
        ];

        let response = self.http.post(&url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CloudError::Auth(format!("malformed token response: {e}")))?;

        debug!(expires_in = token.expires_in, "Acquired ARM token");
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Utc::now()
                + Duration::seconds(token.expires_in - TOKEN_REFRESH_MARGIN_SECS),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<String, CloudError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > Utc::now() {
                return Ok(entry.token.clone());
            }
        }

        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Fixed-token credential for tests and local development against emulators.
pub struct StaticTokenCredential(pub String);

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> Result<String, CloudError> {
        Ok(self.0.clone())
    }
}
