// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! REST client for the Azure Traffic Manager resource provider.
//!
//! Only three operations are needed: profile GET, endpoint PUT and endpoint
//! DELETE, all of the `azureEndpoints` subtype. The [`TrafficManagerApi`]
//! trait is the seam the reconcilers program against; tests substitute an
//! in-memory implementation.

use crate::azure::auth::TokenCredential;
use crate::azure::errors::CloudError;
use crate::azure::{Endpoint, Profile};
use crate::constants::{
    AZURE_ENDPOINT_TYPE_SEGMENT, AZURE_MANAGEMENT_BASE_URL, AZURE_TRAFFIC_MANAGER_API_VERSION,
};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Azure Traffic Manager operations used by the backend reconciler.
#[async_trait]
pub trait TrafficManagerApi: Send + Sync {
    /// GET a Traffic Manager profile, including its endpoint list.
    async fn get_profile(
        &self,
        resource_group: &str,
        profile_name: &str,
    ) -> Result<Profile, CloudError>;

    /// PUT (create or update) an Azure endpoint under a profile. Returns the
    /// endpoint as stored by the server, with server-assigned fields filled.
    async fn create_or_update_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
        endpoint: &Endpoint,
    ) -> Result<Endpoint, CloudError>;

    /// DELETE an Azure endpoint under a profile.
    async fn delete_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
    ) -> Result<(), CloudError>;
}

/// ARM error envelope: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// [`TrafficManagerApi`] implementation over the ARM REST API.
pub struct TrafficManagerClient {
    http: HttpClient,
    credential: Arc<dyn TokenCredential>,
    subscription_id: String,
    base_url: String,
}

impl TrafficManagerClient {
    /// Create a client for a subscription.
    #[must_use]
    pub fn new(credential: Arc<dyn TokenCredential>, subscription_id: String) -> Self {
        Self {
            http: HttpClient::new(),
            credential,
            subscription_id,
            base_url: AZURE_MANAGEMENT_BASE_URL.to_string(),
        }
    }

    /// Override the ARM base URL, for sovereign clouds and test servers.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn profile_url(&self, resource_group: &str, profile_name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/trafficmanagerprofiles/{}?api-version={}",
            self.base_url,
            self.subscription_id,
            resource_group,
            profile_name,
            AZURE_TRAFFIC_MANAGER_API_VERSION
        )
    }

    pub(crate) fn endpoint_url(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
    ) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/trafficmanagerprofiles/{}/{}/{}?api-version={}",
            self.base_url,
            self.subscription_id,
            resource_group,
            profile_name,
            AZURE_ENDPOINT_TYPE_SEGMENT,
            endpoint_name,
            AZURE_TRAFFIC_MANAGER_API_VERSION
        )
    }

    /// Turn a non-success response into a [`CloudError::Api`], extracting the
    /// ARM error envelope when the body carries one.
    async fn error_from_response(response: Response) -> CloudError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(ErrorEnvelope { error: Some(err) }) => CloudError::api(
                status,
                err.code,
                err.message.unwrap_or_else(|| body.clone()),
            ),
            _ => CloudError::api(status, None, body),
        }
    }

    async fn bearer(&self) -> Result<String, CloudError> {
        self.credential.token().await
    }
}

#[async_trait]
impl TrafficManagerApi for TrafficManagerClient {
    async fn get_profile(
        &self,
        resource_group: &str,
        profile_name: &str,
    ) -> Result<Profile, CloudError> {
        let url = self.profile_url(resource_group, profile_name);
        debug!(%url, "GET Traffic Manager profile");
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn create_or_update_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
        endpoint: &Endpoint,
    ) -> Result<Endpoint, CloudError> {
        let url = self.endpoint_url(resource_group, profile_name, endpoint_name);
        debug!(%url, "PUT Traffic Manager endpoint");
        let response = self
            .http
            .put(&url)
            .bearer_auth(self.bearer().await?)
            .json(endpoint)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn delete_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
    ) -> Result<(), CloudError> {
        let url = self.endpoint_url(resource_group, profile_name, endpoint_name);
        debug!(%url, "DELETE Traffic Manager endpoint");
        let response = self
            .http
            .delete(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
