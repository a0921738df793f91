// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for multi-cluster Traffic Manager management.
//!
//! This module defines all Kubernetes Custom Resource Definitions used by
//! Fleetsteer to project fleet service exports onto Azure Traffic Manager.
//!
//! # Resource Types
//!
//! ## User-facing
//!
//! - [`TrafficManagerProfile`] - Describes an Azure Traffic Manager profile
//!   (resource group, monitoring); owned by the companion profile controller
//! - [`TrafficManagerBackend`] - Binds a [`ServiceImport`] to a profile with a
//!   weight; reconciled by this controller
//!
//! ## Fleet-internal
//!
//! - [`ServiceImport`] - Aggregated record of a service's presence across
//!   member clusters
//! - [`InternalServiceExport`] - A single cluster's publication of a service
//!   with its public IP, DNS-label state and weight
//!
//! # Example: Binding a service to a profile
//!
//! ```rust,no_run
//! use fleetsteer::crd::{
//!     TrafficManagerBackendRef, TrafficManagerBackendSpec, TrafficManagerProfileRef,
//! };
//!
//! let spec = TrafficManagerBackendSpec {
//!     profile: TrafficManagerProfileRef {
//!         name: "app-profile".to_string(),
//!     },
//!     backend: TrafficManagerBackendRef {
//!         name: "app-service".to_string(),
//!     },
//!     weight: Some(500),
//! };
//! ```

use crate::constants::DEFAULT_BACKEND_WEIGHT;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Condition Types, Statuses and Reasons
// ============================================================================

/// Condition type on a `TrafficManagerBackend` summarizing whether the desired
/// endpoints are in place in Azure Traffic Manager.
pub const CONDITION_ACCEPTED: &str = "Accepted";

/// Condition type on a `TrafficManagerProfile` asserting that its Azure
/// profile has been provisioned.
pub const CONDITION_PROGRAMMED: &str = "Programmed";

/// Condition status value for a satisfied condition.
pub const CONDITION_STATUS_TRUE: &str = "True";

/// Condition status value for an unsatisfied condition.
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Condition status value when the state cannot be determined yet.
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// All desired endpoints are accepted by Azure Traffic Manager.
pub const REASON_ACCEPTED: &str = "Accepted";

/// The backend or one of its dependencies is invalid.
pub const REASON_INVALID: &str = "Invalid";

/// A dependency is still being processed; the outcome is not known yet.
pub const REASON_PENDING: &str = "Pending";

/// Kubernetes service type accepted for Traffic Manager exposure.
pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `Accepted` or `Programmed`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the resource the condition was computed against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// TrafficManagerProfile
// ============================================================================

/// Monitoring configuration applied to an Azure Traffic Manager profile.
///
/// This controller never touches monitoring; the fields exist so the profile
/// resource round-trips through the API server unchanged.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Monitor port, e.g. 80.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,

    /// Path probed relative to the endpoint domain name, e.g. `/healthz`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Protocol used for probing: HTTP, HTTPS, or TCP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Seconds between consecutive probes of an endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_in_seconds: Option<i64>,

    /// Seconds to wait for a probe response before counting a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_in_seconds: Option<i64>,

    /// Consecutive probe failures tolerated before an endpoint is degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerated_number_of_failures: Option<i64>,
}

/// `TrafficManagerProfile` describes an Azure Traffic Manager profile managed
/// by the companion profile controller.
///
/// This controller only reads the profile: it resolves the Azure resource
/// group and requires the `Programmed` condition to be true at the profile's
/// current generation before programming endpoints.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleetsteer.firestoned.io",
    version = "v1beta1",
    kind = "TrafficManagerProfile",
    namespaced,
    status = "TrafficManagerProfileStatus",
    shortname = "tmp"
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficManagerProfileSpec {
    /// Name of the Azure resource group the Traffic Manager profile lives in.
    #[schemars(length(min = 1, max = 90))]
    pub resource_group: String,

    /// Endpoint monitoring settings for the profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_config: Option<MonitorConfig>,
}

/// `TrafficManagerProfile` status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficManagerProfileStatus {
    /// Conditions describing the profile state; the `Programmed` condition
    /// reports whether the Azure profile has been provisioned.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Fully-qualified DNS name of the Azure profile once programmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

// ============================================================================
// TrafficManagerBackend
// ============================================================================

/// Reference to a `TrafficManagerProfile` in the same namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficManagerProfileRef {
    /// Name of the profile. Immutable after creation.
    #[schemars(length(min = 1, max = 63))]
    pub name: String,
}

/// Reference to the `ServiceImport` exposed by a backend, in the same
/// namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficManagerBackendRef {
    /// Name of the service import. Immutable after creation.
    #[schemars(length(min = 1, max = 63))]
    pub name: String,
}

/// `TrafficManagerBackend` binds a `ServiceImport` to a
/// `TrafficManagerProfile` with an overall weight.
///
/// For each member cluster exporting the service, the controller programs one
/// Azure Traffic Manager endpoint whose weight is the backend weight
/// redistributed proportionally to the per-cluster export weights.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleetsteer.firestoned.io",
    version = "v1beta1",
    kind = "TrafficManagerBackend",
    namespaced,
    status = "TrafficManagerBackendStatus",
    shortname = "tmb"
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficManagerBackendSpec {
    /// The profile endpoints are programmed into. Immutable after creation.
    pub profile: TrafficManagerProfileRef,

    /// The service import exposed through the profile. Immutable after creation.
    pub backend: TrafficManagerBackendRef,

    /// Total weight of traffic routed to this backend, split across the
    /// exporting clusters. 0 removes all endpoints. Defaults to 1.
    #[schemars(range(min = 0, max = 1000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
}

/// Identifies the member cluster an accepted endpoint originates from.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FromCluster {
    /// Member cluster id.
    pub cluster: String,

    /// The raw export weight the cluster declared, before redistribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
}

/// Status of a single Azure Traffic Manager endpoint accepted on behalf of a
/// backend.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficManagerEndpointStatus {
    /// Endpoint name. Azure resource names are case-insensitive; the
    /// lowercased form is stored.
    pub name: String,

    /// DNS name or IP address the endpoint routes to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Effective endpoint weight after redistribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,

    /// The exporting cluster and its declared weight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<FromCluster>,

    /// Fully-qualified Azure resource id returned by the cloud.
    #[serde(rename = "resourceID", default, skip_serializing_if = "String::is_empty")]
    pub resource_id: String,
}

/// `TrafficManagerBackend` status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficManagerBackendStatus {
    /// Conditions describing the backend state; the `Accepted` condition
    /// summarizes whether the desired endpoints are in place.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The Azure Traffic Manager endpoints currently accepted on behalf of
    /// this backend. Always set, possibly empty.
    #[serde(default)]
    pub endpoints: Vec<TrafficManagerEndpointStatus>,
}

// ============================================================================
// ServiceImport
// ============================================================================

/// A port exposed by an imported service.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportPort {
    /// Port name, if the service names its ports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Protocol, defaults to TCP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Port number.
    pub port: i32,
}

/// Presence of an imported service in one member cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Member cluster id.
    pub cluster: String,
}

/// `ServiceImport` spec. The hub controller derives everything from status;
/// spec only mirrors the exported service's ports.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "fleetsteer.firestoned.io",
    version = "v1beta1",
    kind = "ServiceImport",
    namespaced,
    status = "ServiceImportStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportSpec {
    /// Ports of the imported service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ServiceImportPort>,
}

/// `ServiceImport` status: the set of member clusters exporting the service.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportStatus {
    /// Clusters currently exporting the service. Populated by the fleet
    /// membership agents once a cluster's export is admitted.
    #[serde(default)]
    pub clusters: Vec<ClusterStatus>,
}

// ============================================================================
// InternalServiceExport
// ============================================================================

/// Reference from an export back to the service it publishes.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportedObjectReference {
    /// Id of the member cluster publishing the export.
    #[serde(rename = "clusterID")]
    pub cluster_id: String,

    /// Namespace of the exported service.
    pub namespace: String,

    /// Name of the exported service.
    pub name: String,

    /// Precomputed `namespace/name` of the exported service, the key used to
    /// look up all exports of a service.
    pub namespaced_name: String,
}

/// `InternalServiceExport` is a single member cluster's publication of a
/// load-balancer service, carrying the state this controller needs to decide
/// whether the cluster can be exposed as a Traffic Manager endpoint.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "fleetsteer.firestoned.io",
    version = "v1beta1",
    kind = "InternalServiceExport",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InternalServiceExportSpec {
    /// Kubernetes service type of the exported service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,

    /// Whether the service sits behind an internal (VNet-only) load balancer.
    #[serde(default)]
    pub is_internal_load_balancer: bool,

    /// Azure resource id of the public IP fronting the service, once the
    /// member agent has resolved it.
    #[serde(rename = "publicIPResourceID", skip_serializing_if = "Option::is_none")]
    pub public_ip_resource_id: Option<String>,

    /// Whether a DNS label has been configured on the public IP. Traffic
    /// Manager requires a DNS name to route to.
    #[serde(rename = "isDNSLabelConfigured", default)]
    pub is_dns_label_configured: bool,

    /// Relative weight of this cluster among all exporters. Defaults to 1.
    #[schemars(range(min = 0, max = 1000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,

    /// The exported service this object publishes.
    pub service_reference: ExportedObjectReference,
}

// ============================================================================
// Defaulting
// ============================================================================

/// Fill in defaulted `TrafficManagerBackend` spec fields.
///
/// Kept in the controller until a defaulting webhook ships: an unset weight
/// means 1.
pub fn set_default_weight(backend: &mut TrafficManagerBackend) {
    if backend.spec.weight.is_none() {
        backend.spec.weight = Some(DEFAULT_BACKEND_WEIGHT);
    }
}

impl InternalServiceExport {
    /// The export weight with the default applied. Existing export objects
    /// might not have the field set.
    #[must_use]
    pub fn weight_or_default(&self) -> i64 {
        self.spec.weight.unwrap_or(crate::constants::DEFAULT_EXPORT_WEIGHT)
    }
}
