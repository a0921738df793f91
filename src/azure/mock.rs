// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`TrafficManagerApi`] implementation for tests.
//!
//! Behaves like the ARM API for the slice this controller uses: profiles hold
//! an endpoint list, PUT upserts and fills server-assigned fields (id, type,
//! target), DELETE of a missing endpoint returns 404, and failures can be
//! injected per endpoint name to exercise the error classification paths.

use crate::azure::client::TrafficManagerApi;
use crate::azure::errors::CloudError;
use crate::azure::{Endpoint, Profile, ProfileProperties};
use crate::constants::AZURE_ENDPOINT_TYPE;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone)]
struct InjectedError {
    status: u16,
    code: Option<String>,
    message: String,
}

impl InjectedError {
    fn to_error(&self) -> CloudError {
        CloudError::Api {
            status: self.status,
            code: self.code.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Default)]
struct MockState {
    /// (resource group, lowercased profile name) -> profile
    profiles: HashMap<(String, String), Profile>,
    put_failures: HashMap<String, InjectedError>,
    delete_failures: HashMap<String, InjectedError>,
    profile_failure: Option<InjectedError>,
    deleted: Vec<String>,
    put: Vec<String>,
}

/// In-memory Traffic Manager for unit tests.
#[derive(Default)]
pub struct MockTrafficManager {
    state: Mutex<MockState>,
}

impl MockTrafficManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile with the given endpoints.
    pub fn insert_profile(&self, resource_group: &str, name: &str, endpoints: Vec<Endpoint>) {
        let profile = Profile {
            id: Some(format!(
                "/subscriptions/sub/resourceGroups/{resource_group}/providers/Microsoft.Network/trafficManagerProfiles/{name}"
            )),
            name: Some(name.to_string()),
            properties: Some(ProfileProperties { endpoints }),
        };
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert((resource_group.to_string(), name.to_lowercase()), profile);
    }

    /// Make every `get_profile` call fail with the given status.
    pub fn fail_get_profile(&self, status: u16, message: &str) {
        self.state.lock().unwrap().profile_failure = Some(InjectedError {
            status,
            code: None,
            message: message.to_string(),
        });
    }

    /// Make PUTs of the named endpoint fail with the given status/code.
    pub fn fail_put(&self, endpoint_name: &str, status: u16, code: Option<&str>, message: &str) {
        self.state.lock().unwrap().put_failures.insert(
            endpoint_name.to_lowercase(),
            InjectedError {
                status,
                code: code.map(str::to_string),
                message: message.to_string(),
            },
        );
    }

    /// Make DELETEs of the named endpoint fail with the given status.
    pub fn fail_delete(&self, endpoint_name: &str, status: u16, message: &str) {
        self.state.lock().unwrap().delete_failures.insert(
            endpoint_name.to_lowercase(),
            InjectedError {
                status,
                code: None,
                message: message.to_string(),
            },
        );
    }

    /// Snapshot of a profile's endpoints, sorted by name.
    #[must_use]
    pub fn endpoints(&self, resource_group: &str, profile_name: &str) -> Vec<Endpoint> {
        let state = self.state.lock().unwrap();
        let mut endpoints = state
            .profiles
            .get(&(resource_group.to_string(), profile_name.to_lowercase()))
            .and_then(|p| p.properties.as_ref())
            .map(|p| p.endpoints.clone())
            .unwrap_or_default();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        endpoints
    }

    /// Names of endpoints deleted so far, in call order.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Names of endpoints PUT so far, in call order.
    #[must_use]
    pub fn put(&self) -> Vec<String> {
        self.state.lock().unwrap().put.clone()
    }
}

fn not_found(what: &str) -> CloudError {
    CloudError::Api {
        status: 404,
        code: Some("ResourceNotFound".to_string()),
        message: format!("{what} was not found"),
    }
}

#[async_trait]
impl TrafficManagerApi for MockTrafficManager {
    async fn get_profile(
        &self,
        resource_group: &str,
        profile_name: &str,
    ) -> Result<Profile, CloudError> {
        let state = self.state.lock().unwrap();
        if let Some(failure) = &state.profile_failure {
            return Err(failure.to_error());
        }
        state
            .profiles
            .get(&(resource_group.to_string(), profile_name.to_lowercase()))
            .cloned()
            .ok_or_else(|| not_found(profile_name))
    }

    async fn create_or_update_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
        endpoint: &Endpoint,
    ) -> Result<Endpoint, CloudError> {
        let lowered = endpoint_name.to_lowercase();
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.put_failures.get(&lowered) {
            let err = failure.to_error();
            state.put.push(lowered);
            return Err(err);
        }

        let profile = state
            .profiles
            .get_mut(&(resource_group.to_string(), profile_name.to_lowercase()))
            .ok_or_else(|| not_found(profile_name))?;

        let mut stored = endpoint.clone();
        stored.name = Some(endpoint_name.to_string());
        stored.r#type = Some(AZURE_ENDPOINT_TYPE.to_string());
        stored.id = Some(format!(
            "/subscriptions/sub/resourceGroups/{resource_group}/providers/Microsoft.Network/trafficManagerProfiles/{profile_name}/azureEndpoints/{endpoint_name}"
        ));
        if let Some(properties) = stored.properties.as_mut() {
            if properties.target.is_none() {
                // The server resolves the DNS target from the target resource.
                let leaf = properties
                    .target_resource_id
                    .as_deref()
                    .and_then(|id| id.rsplit('/').next())
                    .unwrap_or("unknown");
                properties.target = Some(format!("{leaf}.cloudapp.azure.com"));
            }
        }

        let endpoints = &mut profile
            .properties
            .get_or_insert_with(ProfileProperties::default)
            .endpoints;
        match endpoints
            .iter_mut()
            .find(|e| e.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(endpoint_name)))
        {
            Some(existing) => *existing = stored.clone(),
            None => endpoints.push(stored.clone()),
        }

        state.put.push(lowered);
        Ok(stored)
    }

    async fn delete_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
    ) -> Result<(), CloudError> {
        let lowered = endpoint_name.to_lowercase();
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.delete_failures.get(&lowered) {
            return Err(failure.to_error());
        }

        let profile = state
            .profiles
            .get_mut(&(resource_group.to_string(), profile_name.to_lowercase()))
            .ok_or_else(|| not_found(profile_name))?;

        let endpoints = &mut profile
            .properties
            .get_or_insert_with(ProfileProperties::default)
            .endpoints;
        let before = endpoints.len();
        endpoints.retain(|e| {
            !e.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(endpoint_name))
        });
        if endpoints.len() == before {
            return Err(not_found(endpoint_name));
        }

        state.deleted.push(lowered);
        Ok(())
    }
}
