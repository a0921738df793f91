// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Fleetsteer controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Fleetsteer CRDs
pub const API_GROUP: &str = "fleetsteer.firestoned.io";

/// API version for all Fleetsteer CRDs
pub const API_VERSION: &str = "v1beta1";

/// Kind name for `TrafficManagerBackend` resource
pub const KIND_TRAFFIC_MANAGER_BACKEND: &str = "TrafficManagerBackend";

/// Kind name for `TrafficManagerProfile` resource
pub const KIND_TRAFFIC_MANAGER_PROFILE: &str = "TrafficManagerProfile";

/// Kind name for `ServiceImport` resource
pub const KIND_SERVICE_IMPORT: &str = "ServiceImport";

/// Kind name for `InternalServiceExport` resource
pub const KIND_INTERNAL_SERVICE_EXPORT: &str = "InternalServiceExport";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer guarding Azure Traffic Manager endpoint cleanup.
///
/// Added only immediately before the first cloud mutation on behalf of a
/// backend, so that a backend which never reached the cloud (for example one
/// pointing at a misconfigured resource group) can be deleted without its
/// removal getting stuck behind a cloud call that can never succeed.
pub const TRAFFIC_MANAGER_BACKEND_CLEANUP_FINALIZER: &str =
    "fleetsteer.firestoned.io/traffic-manager-backend-cleanup";

/// Finalizer guarding per-backend metric series cleanup.
pub const METRICS_FINALIZER: &str = "fleetsteer.firestoned.io/metrics";

// ============================================================================
// Azure Naming Contract
// ============================================================================

/// Prefix of every Azure Traffic Manager endpoint created by this controller
/// for a given backend: `fleet-{TrafficManagerBackendUID}#`.
///
/// The backend UID is used so that cross-namespace backends can be supported
/// in the future without name collisions. The prefix doubles as the ownership
/// token: cleanup only ever touches endpoints carrying it.
pub const AZURE_ENDPOINT_NAME_PREFIX: &str = "fleet-";

/// Separator between the endpoint name components
/// (`fleet-{uid}#{serviceImportName}#{clusterName}`).
pub const AZURE_ENDPOINT_NAME_SEPARATOR: char = '#';

/// Prefix of the Azure Traffic Manager profile created by the profile
/// controller: the deterministic cloud profile name is `fleet-{ProfileUID}`.
pub const AZURE_PROFILE_NAME_PREFIX: &str = "fleet-";

/// Maximum length of an Azure Traffic Manager endpoint name.
///
/// ServiceImport names follow RFC 1035 (up to 63 characters) and cluster
/// names are restricted to 63 characters, keeping generated names well under
/// this limit.
pub const AZURE_ENDPOINT_NAME_MAX_LEN: usize = 260;

/// Azure resource type string of an Azure endpoint under a Traffic Manager
/// profile, as returned by the Azure API.
pub const AZURE_ENDPOINT_TYPE: &str = "Microsoft.Network/trafficManagerProfiles/azureEndpoints";

/// URL path segment selecting the Azure endpoint subtype in ARM requests.
pub const AZURE_ENDPOINT_TYPE_SEGMENT: &str = "azureEndpoints";

/// ARM api-version used for all Traffic Manager requests.
pub const AZURE_TRAFFIC_MANAGER_API_VERSION: &str = "2022-04-01";

/// Base URL of the Azure Resource Manager API.
pub const AZURE_MANAGEMENT_BASE_URL: &str = "https://management.azure.com";

/// OAuth2 scope requested for ARM tokens.
pub const AZURE_MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Base URL of the AAD token endpoint.
pub const AZURE_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";

// ============================================================================
// Weights
// ============================================================================

/// Default weight of a `TrafficManagerBackend` when unset.
pub const DEFAULT_BACKEND_WEIGHT: i64 = 1;

/// Default weight of an `InternalServiceExport` when unset.
pub const DEFAULT_EXPORT_WEIGHT: i64 = 1;

/// Maximum backend weight accepted by the CRD schema.
pub const MAX_BACKEND_WEIGHT: i64 = 1000;

// ============================================================================
// Event Reasons
// ============================================================================

/// Event reason for accepted endpoint updates.
pub const EVENT_REASON_ACCEPTED: &str = "Accepted";

/// Event reason for completed endpoint deletions.
pub const EVENT_REASON_DELETED: &str = "Deleted";

/// Event reason for Azure API failures.
pub const EVENT_REASON_AZURE_API_ERROR: &str = "AzureAPIError";

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Concurrency cap for parallel endpoint deletions during teardown.
pub const ENDPOINT_DELETE_CONCURRENCY: usize = 8;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election retry period (2 seconds)
pub const DEFAULT_LEASE_RETRY_PERIOD_SECS: u64 = 2;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
