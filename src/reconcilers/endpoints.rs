// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Endpoint derivation and cloud convergence.
//!
//! This module turns the exported-service state behind a backend into a
//! desired set of Azure Traffic Manager endpoints, and drives the cloud
//! profile to converge on that set.
//!
//! # Weight redistribution
//!
//! Each eligible export contributes one endpoint whose effective weight is
//! the backend weight split proportionally to the per-cluster export weights,
//! with a final ceiling:
//!
//! ```text
//! effective = ceil(backendWeight * exportWeight / totalExportWeight)
//! ```
//!
//! The ceiling avoids rounding an endpoint down to weight 0 (which Azure
//! rejects); the sum of effective weights may exceed the backend weight by up
//! to the number of endpoints. All arithmetic is 64-bit integer.

use crate::azure::{
    self, CloudError, Endpoint, EndpointProperties, EndpointStatus, Profile, TrafficManagerApi,
};
use crate::constants::{AZURE_ENDPOINT_TYPE, ENDPOINT_DELETE_CONCURRENCY};
use crate::crd::{
    FromCluster, InternalServiceExport, ServiceImport, TrafficManagerBackend,
    TrafficManagerEndpointStatus, SERVICE_TYPE_LOAD_BALANCER,
};
use futures::{StreamExt, TryStreamExt};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A desired Azure endpoint together with its provenance.
#[derive(Clone, Debug)]
pub struct DesiredEndpoint {
    /// The endpoint payload to be stored in Azure.
    pub endpoint: Endpoint,
    /// The exporting cluster and its raw (pre-redistribution) weight.
    pub from_cluster: FromCluster,
}

/// The result of deriving endpoints from the service import's clusters.
#[derive(Debug, Default)]
pub struct DerivedEndpoints {
    /// Desired endpoints keyed by lowercased endpoint name.
    pub desired: BTreeMap<String, DesiredEndpoint>,
    /// Exports that cannot be exposed, keyed by cluster id, with the reason.
    pub invalid_by_cluster: BTreeMap<String, String>,
}

/// Outcome of [`derive_endpoints`].
#[derive(Debug)]
pub enum Derivation {
    /// Every cluster in the import resolved to an export.
    Derived(DerivedEndpoints),
    /// A cluster listed by the service import has no matching export: the
    /// import is stale, and its next update re-triggers reconciliation.
    MissingExport {
        /// The cluster with no export.
        cluster: String,
    },
}

/// Outcome of a convergence pass over the cloud profile.
#[derive(Debug, Default)]
pub struct ConvergeOutcome {
    /// Endpoint statuses accepted by the cloud, sorted by name.
    pub accepted: Vec<TrafficManagerEndpointStatus>,
    /// Endpoints rejected by the cloud with a non-throttling client error.
    /// They do not block the rest of the pass; the reconciler reports them in
    /// the Accepted condition and returns their join for a backoff retry.
    pub bad_endpoints: Vec<CloudError>,
    /// Names of endpoints created or updated this pass, for event emission.
    pub created: Vec<String>,
}

/// A transient cloud failure that aborted the convergence pass.
///
/// Carries the message the reconciler puts into the `Accepted=Unknown`
/// condition before requeueing.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConvergeError {
    /// Condition message for the aborted pass.
    pub message: String,
    /// The cloud failure that caused the abort.
    #[source]
    pub source: CloudError,
}

/// Check whether an exported service can be exposed as a Traffic Manager
/// endpoint.
///
/// # Errors
///
/// Returns the reason the export is ineligible.
pub fn validate_export(export: &InternalServiceExport) -> Result<(), String> {
    if export.spec.r#type != SERVICE_TYPE_LOAD_BALANCER {
        return Err(format!("unsupported service type {:?}", export.spec.r#type));
    }
    if export.spec.is_internal_load_balancer {
        return Err("internal load balancer is not supported".to_string());
    }
    if export.spec.public_ip_resource_id.is_none() {
        return Err("in the processing of configuring public IP".to_string());
    }
    if !export.spec.is_dns_label_configured {
        return Err("DNS label is not configured to the public IP".to_string());
    }
    Ok(())
}

/// Build the desired Azure endpoint for one eligible export, carrying the raw
/// export weight; redistribution happens once the total is known.
fn desired_endpoint(backend: &TrafficManagerBackend, export: &InternalServiceExport) -> Endpoint {
    let name = azure::endpoint_name(
        &backend.uid().unwrap_or_default(),
        &backend.spec.backend.name,
        &export.spec.service_reference.cluster_id,
    );
    Endpoint {
        id: None,
        name: Some(name),
        r#type: Some(AZURE_ENDPOINT_TYPE.to_string()),
        properties: Some(EndpointProperties {
            target_resource_id: export.spec.public_ip_resource_id.clone(),
            target: None,
            weight: Some(export.weight_or_default()),
            endpoint_status: Some(EndpointStatus::Enabled),
        }),
    }
}

/// Derive the desired endpoint set for a backend from the service import's
/// cluster list and the matching exports.
///
/// Exports with an explicit weight of 0 are eligible but contribute no
/// endpoint; if every export has weight 0 the desired set is empty and
/// convergence removes all owned endpoints.
#[must_use]
pub fn derive_endpoints(
    backend: &TrafficManagerBackend,
    service_import: &ServiceImport,
    exports: &[Arc<InternalServiceExport>],
) -> Derivation {
    let exports_by_cluster: BTreeMap<&str, &InternalServiceExport> = exports
        .iter()
        .map(|e| (e.spec.service_reference.cluster_id.as_str(), e.as_ref()))
        .collect();

    let clusters = service_import
        .status
        .as_ref()
        .map(|s| s.clusters.as_slice())
        .unwrap_or_default();

    let mut derived = DerivedEndpoints::default();
    let mut total_weight: i64 = 0;
    for cluster_status in clusters {
        let Some(export) = exports_by_cluster.get(cluster_status.cluster.as_str()) else {
            // The import normally updates before its exports disappear; a
            // miss means this import snapshot is stale.
            warn!(
                cluster = %cluster_status.cluster,
                serviceImport = %service_import.name_any(),
                "InternalServiceExport not found for the cluster"
            );
            return Derivation::MissingExport {
                cluster: cluster_status.cluster.clone(),
            };
        };
        if let Err(reason) = validate_export(export) {
            debug!(
                cluster = %cluster_status.cluster,
                reason,
                "Service cannot be exposed as a Traffic Manager endpoint"
            );
            derived
                .invalid_by_cluster
                .insert(cluster_status.cluster.clone(), reason);
            continue;
        }
        let weight = export.weight_or_default();
        if weight == 0 {
            debug!(
                cluster = %cluster_status.cluster,
                "Export weight is 0, no endpoint desired for the cluster"
            );
            continue;
        }

        let endpoint = desired_endpoint(backend, export);
        let name = endpoint.name.clone().unwrap_or_default();
        derived.desired.insert(
            name,
            DesiredEndpoint {
                endpoint,
                from_cluster: FromCluster {
                    cluster: cluster_status.cluster.clone(),
                    weight: Some(weight),
                },
            },
        );
        total_weight += weight;
    }

    // Redistribute: every desired endpoint has weight >= 1, so total_weight
    // is positive whenever the map is non-empty.
    let backend_weight = backend
        .spec
        .weight
        .unwrap_or(crate::constants::DEFAULT_BACKEND_WEIGHT);
    for desired in derived.desired.values_mut() {
        if let Some(properties) = desired.endpoint.properties.as_mut() {
            let raw = properties.weight.unwrap_or(1);
            properties.weight = Some((backend_weight * raw + total_weight - 1) / total_weight);
        }
    }

    debug!(
        numberOfDesiredEndpoints = derived.desired.len(),
        numberOfInvalidServices = derived.invalid_by_cluster.len(),
        totalWeight = total_weight,
        "Finished validating services and deriving endpoints"
    );
    Derivation::Derived(derived)
}

/// Compare the fields of a cloud endpoint this controller manages against the
/// desired endpoint, ignoring server-assigned fields.
///
/// Azure compares names, types and resource ids case-insensitively. The
/// desired endpoint is built by this controller, so its fields are always
/// present; a cloud endpoint missing any of them is not equal.
#[must_use]
pub fn endpoints_equal(current: &Endpoint, desired: &Endpoint) -> bool {
    let type_matches = match (current.r#type.as_deref(), desired.r#type.as_deref()) {
        (Some(current), Some(desired)) => current.eq_ignore_ascii_case(desired),
        _ => false,
    };
    if !type_matches {
        return false;
    }
    let (Some(current), Some(desired)) = (current.properties.as_ref(), desired.properties.as_ref())
    else {
        return false;
    };
    let target_matches = match (
        current.target_resource_id.as_deref(),
        desired.target_resource_id.as_deref(),
    ) {
        (Some(current), Some(desired)) => current.eq_ignore_ascii_case(desired),
        _ => false,
    };
    target_matches
        && current.weight.is_some()
        && current.weight == desired.weight
        && current.endpoint_status.is_some()
        && current.endpoint_status == desired.endpoint_status
}

/// Build the status entry for an endpoint the cloud accepted.
///
/// The cloud always assigns a resource id; if it is missing the entry is
/// still built with an empty id rather than failing the pass.
#[must_use]
pub fn build_accepted_status(
    stored: &Endpoint,
    from_cluster: &FromCluster,
) -> TrafficManagerEndpointStatus {
    let resource_id = match stored.id.as_deref() {
        Some(id) => id.to_string(),
        None => {
            error!(
                atmEndpoint = stored.name.as_deref().unwrap_or_default(),
                "Azure Traffic Manager returned an endpoint with no resource id"
            );
            String::new()
        }
    };
    let properties = stored.properties.as_ref();
    TrafficManagerEndpointStatus {
        name: stored.name.as_deref().unwrap_or_default().to_lowercase(),
        target: properties.and_then(|p| p.target.clone()),
        weight: properties.and_then(|p| p.weight),
        from: Some(from_cluster.clone()),
        resource_id,
    }
}

/// Converge the cloud profile's endpoints owned by this backend onto the
/// desired set.
///
/// Walks the profile's current endpoint list: endpoints of other backends are
/// skipped, owned endpoints with no desired counterpart are deleted, and
/// owned endpoints equal to their desired counterpart are kept as-is. The
/// remaining desired endpoints are PUT. Client errors that are not throttling
/// mark the endpoint bad and the pass continues; everything else aborts with
/// a [`ConvergeError`].
///
/// # Errors
///
/// Returns a [`ConvergeError`] on a transient cloud failure; the caller sets
/// `Accepted=Unknown` and requeues.
pub async fn converge_endpoints(
    cloud: &dyn TrafficManagerApi,
    resource_group: &str,
    backend: &TrafficManagerBackend,
    profile: &Profile,
    mut desired: BTreeMap<String, DesiredEndpoint>,
) -> Result<ConvergeOutcome, ConvergeError> {
    let backend_uid = backend.uid().unwrap_or_default();
    let profile_name = profile.name.as_deref().unwrap_or_default();
    let current = profile
        .properties
        .as_ref()
        .map(|p| p.endpoints.as_slice())
        .unwrap_or_default();

    let mut outcome = ConvergeOutcome::default();
    for endpoint in current {
        let Some(name) = endpoint.name.as_deref() else {
            error!(?endpoint, "Azure Traffic Manager endpoint name is nil");
            continue;
        };
        let name = name.to_lowercase();
        if !azure::is_endpoint_owned(&backend_uid, &name) {
            continue;
        }

        let unchanged = desired
            .get(&name)
            .map(|d| endpoints_equal(endpoint, &d.endpoint));
        match unchanged {
            None => {
                info!(
                    resourceGroup = resource_group,
                    atmProfile = profile_name,
                    atmEndpoint = %name,
                    "Deleting the Azure Traffic Manager endpoint"
                );
                match cloud
                    .delete_endpoint(resource_group, profile_name, &name)
                    .await
                {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {
                        debug!(atmEndpoint = %name, "Ignoring NotFound Azure Traffic Manager endpoint");
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            atmEndpoint = %name,
                            "Failed to delete the Azure Traffic Manager endpoint"
                        );
                        return Err(ConvergeError {
                            message: format!(
                                "Failed to cleanup the existing {name:?} for {profile_name:?}: {err}"
                            ),
                            source: err,
                        });
                    }
                }
            }
            Some(true) => {
                debug!(
                    atmEndpoint = %name,
                    "Skipping updating the existing Traffic Manager endpoint"
                );
                if let Some(desired_endpoint) = desired.remove(&name) {
                    outcome
                        .accepted
                        .push(build_accepted_status(endpoint, &desired_endpoint.from_cluster));
                }
            }
            // Differs from desired: left in the map, updated below.
            Some(false) => {}
        }
    }

    for (name, desired_endpoint) in desired {
        info!(
            resourceGroup = resource_group,
            atmProfile = profile_name,
            atmEndpoint = %name,
            "Creating or updating the Traffic Manager endpoint"
        );
        match cloud
            .create_or_update_endpoint(
                resource_group,
                profile_name,
                &name,
                &desired_endpoint.endpoint,
            )
            .await
        {
            Ok(stored) => {
                outcome
                    .accepted
                    .push(build_accepted_status(&stored, &desired_endpoint.from_cluster));
                outcome.created.push(name);
            }
            Err(err) if err.is_client_error() && !err.is_throttled() => {
                error!(
                    error = %err,
                    atmEndpoint = %name,
                    "Azure rejected the Traffic Manager endpoint, continuing with the rest"
                );
                outcome.bad_endpoints.push(err);
            }
            Err(err) => {
                error!(
                    error = %err,
                    atmEndpoint = %name,
                    "Failed to create or update the Traffic Manager endpoint"
                );
                return Err(ConvergeError {
                    message: format!(
                        "Failed to create or update {name:?} for {profile_name:?}: {err}"
                    ),
                    source: err,
                });
            }
        }
    }

    outcome.accepted.sort_by(|a, b| a.name.cmp(&b.name));
    info!(
        numberOfAcceptedEndpoints = outcome.accepted.len(),
        numberOfBadEndpoints = outcome.bad_endpoints.len(),
        "Finished updating the Traffic Manager endpoints"
    );
    Ok(outcome)
}

/// Delete every endpoint of the cloud profile owned by this backend, in
/// parallel with a bounded concurrency cap. NotFound responses are tolerated;
/// the first other failure cancels the remaining deletes and is returned.
///
/// # Errors
///
/// Returns the first non-NotFound cloud failure.
pub async fn cleanup_endpoints(
    cloud: &dyn TrafficManagerApi,
    resource_group: &str,
    backend: &TrafficManagerBackend,
    profile: &Profile,
) -> Result<(), CloudError> {
    let backend_uid = backend.uid().unwrap_or_default();
    let Some(profile_name) = profile.name.as_deref() else {
        error!("Azure Traffic Manager profile has no name, skipping endpoint deletion");
        return Ok(());
    };
    let Some(properties) = profile.properties.as_ref() else {
        debug!(
            atmProfile = profile_name,
            "Azure Traffic Manager profile has no properties, skipping endpoint deletion"
        );
        return Ok(());
    };

    let owned: Vec<String> = properties
        .endpoints
        .iter()
        .filter_map(|endpoint| {
            let Some(name) = endpoint.name.as_deref() else {
                error!(?endpoint, "Azure Traffic Manager endpoint name is nil");
                return None;
            };
            azure::is_endpoint_owned(&backend_uid, name).then(|| name.to_lowercase())
        })
        .collect();

    info!(
        resourceGroup = resource_group,
        atmProfile = profile_name,
        count = owned.len(),
        "Deleting Azure Traffic Manager endpoints"
    );
    futures::stream::iter(owned.into_iter().map(|name| async move {
        match cloud
            .delete_endpoint(resource_group, profile_name, &name)
            .await
        {
            Ok(()) => {
                debug!(atmEndpoint = %name, "Deleted Azure Traffic Manager endpoint");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!(atmEndpoint = %name, "Ignoring NotFound Azure Traffic Manager endpoint");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, atmEndpoint = %name, "Failed to delete the endpoint");
                Err(err)
            }
        }
    }))
    .buffer_unordered(ENDPOINT_DELETE_CONCURRENCY)
    .try_collect::<Vec<()>>()
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "endpoints_tests.rs"]
mod endpoints_tests;
