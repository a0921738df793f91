// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure Traffic Manager client layer.
//!
//! This module contains everything that touches the Azure Resource Manager
//! API: the wire types for profiles and endpoints, the error classification
//! used by the reconciler, the AAD token flow, and the REST client behind the
//! [`TrafficManagerApi`] seam.
//!
//! The surface is deliberately tiny - the controller only ever GETs a
//! profile, PUTs endpoints and DELETEs endpoints. Everything else about the
//! profile (monitoring, DNS config, routing method) belongs to the companion
//! profile controller.
//!
//! # Naming contract
//!
//! Azure resource names created by the fleet are derived from Kubernetes
//! object UIDs and are stable across controller versions:
//!
//! - profile: `fleet-{TrafficManagerProfileUID}`
//! - endpoint: `fleet-{TrafficManagerBackendUID}#{ServiceImportName}#{ClusterName}`
//!
//! The endpoint prefix doubles as the ownership token; see
//! [`endpoint_name_prefix`].

pub mod auth;
pub mod client;
pub mod errors;

#[cfg(test)]
pub mod mock;


pub use client::{TrafficManagerApi, TrafficManagerClient};
pub use errors::CloudError;

use crate::constants::{
    AZURE_ENDPOINT_NAME_PREFIX, AZURE_ENDPOINT_NAME_SEPARATOR, AZURE_PROFILE_NAME_PREFIX,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Wire Types
// ============================================================================

/// An Azure Traffic Manager profile as returned by the ARM API.
///
/// Only the fields this controller reads are modeled; unknown fields are
/// dropped on deserialization.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Fully-qualified Azure resource id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Profile name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Profile properties, including its endpoint list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<ProfileProperties>,
}

/// Properties of a Traffic Manager profile.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileProperties {
    /// The endpoints currently attached to the profile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
}

/// A Traffic Manager endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Fully-qualified Azure resource id, assigned by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Endpoint name. Azure matches endpoint names case-insensitively.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Azure resource type string, e.g.
    /// `Microsoft.Network/trafficManagerProfiles/azureEndpoints`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// Endpoint properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<EndpointProperties>,
}

/// Properties of a Traffic Manager endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointProperties {
    /// Azure resource id of the target resource (the exported service's
    /// public IP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resource_id: Option<String>,

    /// DNS name of the target, filled in by the server from the target
    /// resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Endpoint weight used by weighted routing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,

    /// Whether the endpoint participates in routing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_status: Option<EndpointStatus>,
}

/// Routing status of an endpoint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EndpointStatus {
    /// The endpoint is probed and receives traffic.
    Enabled,
    /// The endpoint is excluded from routing.
    Disabled,
}

// ============================================================================
// Naming
// ============================================================================

/// Deterministic Azure profile name for a `TrafficManagerProfile` UID:
/// `fleet-{uid}`.
///
/// The profile controller owns creation under this name; this controller only
/// derives it for GETs.
#[must_use]
pub fn profile_name(profile_uid: &str) -> String {
    format!("{AZURE_PROFILE_NAME_PREFIX}{profile_uid}")
}

/// Ownership prefix of every endpoint created for a backend UID:
/// `fleet-{uid}#`.
///
/// No other backend can produce names under this prefix, and cleanup never
/// touches endpoints outside it. The prefix format is part of the externally
/// observable contract; changing it is a migration event.
#[must_use]
pub fn endpoint_name_prefix(backend_uid: &str) -> String {
    format!("{AZURE_ENDPOINT_NAME_PREFIX}{backend_uid}{AZURE_ENDPOINT_NAME_SEPARATOR}")
}

/// Full endpoint name for one exporting cluster:
/// `fleet-{uid}#{serviceImportName}#{clusterName}`, lowercased.
///
/// ServiceImport names are RFC 1035 names (<= 63 chars) and cluster names are
/// restricted to 63 chars, so the result stays far below the Azure limit of
/// 260 characters.
#[must_use]
pub fn endpoint_name(backend_uid: &str, service_import_name: &str, cluster_id: &str) -> String {
    format!(
        "{}{service_import_name}{AZURE_ENDPOINT_NAME_SEPARATOR}{cluster_id}",
        endpoint_name_prefix(backend_uid)
    )
    .to_lowercase()
}

/// Whether `endpoint_name` carries the ownership prefix of the given backend
/// UID. Azure resource names are case-insensitive.
#[must_use]
pub fn is_endpoint_owned(backend_uid: &str, endpoint_name: &str) -> bool {
    endpoint_name
        .to_lowercase()
        .starts_with(&endpoint_name_prefix(backend_uid).to_lowercase())
}
