// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `TrafficManagerBackend` reconciliation logic.
//!
//! A reconcile pass runs a linear validation chain; each stage either
//! produces the artifact the next stage needs, finishes the pass after
//! writing status (the object is in an expected-invalid state and a watch on
//! the dependency re-triggers us), or fails with a retryable error:
//!
//! 1. profile validation - the referenced `TrafficManagerProfile` must be
//!    `Programmed` at its current generation
//! 2. cloud profile validation - the Azure profile must exist under the
//!    profile's resource group
//! 3. service import validation - the referenced `ServiceImport` must exist;
//!    its absence triggers stale-endpoint cleanup
//! 4. weight-zero shortcut - a backend with weight 0 owns no endpoints
//! 5. endpoint derivation and cloud convergence
//!
//! Every terminus assigns `status.endpoints` (possibly empty) and the
//! `Accepted` condition, then writes status exactly once.

use crate::azure;
use crate::constants::{
    EVENT_REASON_ACCEPTED, EVENT_REASON_AZURE_API_ERROR, EVENT_REASON_DELETED, METRICS_FINALIZER,
    TRAFFIC_MANAGER_BACKEND_CLEANUP_FINALIZER,
};
use crate::context::Context;
use crate::crd::{
    Condition, ServiceImport, TrafficManagerBackend, TrafficManagerBackendStatus,
    TrafficManagerEndpointStatus, TrafficManagerProfile, CONDITION_ACCEPTED, CONDITION_PROGRAMMED,
    CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_STATUS_UNKNOWN, REASON_ACCEPTED,
    REASON_INVALID, REASON_PENDING,
};
use crate::reconcilers::endpoints::{
    cleanup_endpoints, converge_endpoints, derive_endpoints, ConvergeOutcome, Derivation,
};
use crate::reconcilers::finalizers::{contains_finalizer, ensure_finalizer, remove_finalizers};
use crate::reconcilers::status::{
    create_condition, find_condition, is_condition_false, is_condition_true, set_status_condition,
};
use anyhow::{Context as _, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Outcome of one validation stage.
///
/// `Done` is the explicit third outcome next to success and failure: the pass
/// is complete without error because status has been written for an
/// expected-invalid state, and a watch event on the dependency will
/// re-trigger reconciliation.
pub enum Stage<T> {
    /// The stage produced the artifact the next stage needs.
    Proceed(T),
    /// Reconciliation is complete for this pass; status has been written.
    Done,
}

// ============================================================================
// Condition projection
// ============================================================================

fn set_true_condition(
    backend: &mut TrafficManagerBackend,
    accepted: Vec<TrafficManagerEndpointStatus>,
) {
    let condition = create_condition(
        CONDITION_ACCEPTED,
        CONDITION_STATUS_TRUE,
        REASON_ACCEPTED,
        &format!(
            "{} service(s) exported from clusters have been accepted as Traffic Manager endpoints",
            accepted.len()
        ),
        backend.metadata.generation,
    );
    assign_status(backend, condition, accepted);
}

fn set_false_condition(
    backend: &mut TrafficManagerBackend,
    accepted: Vec<TrafficManagerEndpointStatus>,
    message: &str,
) {
    let condition = create_condition(
        CONDITION_ACCEPTED,
        CONDITION_STATUS_FALSE,
        REASON_INVALID,
        message,
        backend.metadata.generation,
    );
    assign_status(backend, condition, accepted);
}

fn set_unknown_condition(backend: &mut TrafficManagerBackend, message: &str) {
    let condition = create_condition(
        CONDITION_ACCEPTED,
        CONDITION_STATUS_UNKNOWN,
        REASON_PENDING,
        message,
        backend.metadata.generation,
    );
    assign_status(backend, condition, vec![]);
}

fn assign_status(
    backend: &mut TrafficManagerBackend,
    condition: Condition,
    endpoints: Vec<TrafficManagerEndpointStatus>,
) {
    let status = backend
        .status
        .get_or_insert_with(TrafficManagerBackendStatus::default);
    status.endpoints = endpoints;
    set_status_condition(&mut status.conditions, condition);
}

/// Persist the backend's status subresource.
async fn update_status(ctx: &Context, backend: &TrafficManagerBackend) -> Result<()> {
    let api: Api<TrafficManagerBackend> = Api::namespaced(
        ctx.client.clone(),
        &backend.namespace().unwrap_or_default(),
    );
    let patch = json!({ "status": backend.status });
    api.patch_status(
        &backend.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await
    .with_context(|| {
        format!(
            "failed to update trafficManagerBackend {:?} status",
            backend.name_any()
        )
    })?;
    debug!(
        trafficManagerBackend = %backend.name_any(),
        "Updated trafficManagerBackend status"
    );
    Ok(())
}

/// Publish a Kubernetes event for the backend, logging instead of failing if
/// event recording is unavailable.
async fn publish_event(
    ctx: &Context,
    backend: &TrafficManagerBackend,
    type_: EventType,
    reason: &str,
    note: String,
) {
    let recorder = ctx.recorder(backend);
    let result = recorder
        .publish(Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        })
        .await;
    if let Err(err) = result {
        warn!(error = %err, reason, "Failed to publish event");
    }
}

// ============================================================================
// Update path
// ============================================================================

/// Reconcile a live (non-deleting) backend.
///
/// # Errors
///
/// Returns an error when a transient API or cloud failure should requeue the
/// backend with backoff.
pub async fn handle_update(ctx: &Context, backend: &mut TrafficManagerBackend) -> Result<Action> {
    let profile = match validate_profile(ctx, backend).await? {
        Stage::Proceed(profile) => profile,
        Stage::Done => return Ok(Action::await_change()),
    };
    debug!(
        trafficManagerProfile = %profile.name_any(),
        "Found the valid trafficManagerProfile"
    );

    let atm_profile = match validate_cloud_profile(ctx, backend, &profile).await? {
        Stage::Proceed(atm_profile) => atm_profile,
        Stage::Done => return Ok(Action::await_change()),
    };

    let resource_group = profile.spec.resource_group.as_str();
    let service_import =
        match validate_service_import(ctx, resource_group, backend, &atm_profile).await? {
            Stage::Proceed(service_import) => service_import,
            Stage::Done => return Ok(Action::await_change()),
        };

    if backend.spec.weight.unwrap_or(crate::constants::DEFAULT_BACKEND_WEIGHT) == 0 {
        info!(
            trafficManagerBackend = %backend.name_any(),
            "Weight is 0, deleting all the endpoints"
        );
        if let Err(err) =
            cleanup_endpoints(ctx.cloud.as_ref(), resource_group, backend, &atm_profile).await
        {
            publish_event(
                ctx,
                backend,
                EventType::Warning,
                EVENT_REASON_AZURE_API_ERROR,
                format!("Failed to delete Azure Traffic Manager endpoints: {err}"),
            )
            .await;
            return Err(err.into());
        }
        publish_event(
            ctx,
            backend,
            EventType::Normal,
            EVENT_REASON_ACCEPTED,
            "Successfully removed all endpoints from Azure Traffic Manager due to zero weight"
                .to_string(),
        )
        .await;
        set_true_condition(backend, vec![]);
        update_status(ctx, backend).await?;
        return Ok(Action::await_change());
    }

    // The service import only gains a cluster list once a member cluster's
    // export is admitted; until then there is nothing to program.
    let clusters_known = service_import
        .status
        .as_ref()
        .is_some_and(|s| !s.clusters.is_empty());
    if !clusters_known {
        debug!(
            serviceImport = %service_import.name_any(),
            "No clusters found in the serviceImport"
        );
        set_unknown_condition(backend, "In the process of exporting the services");
        update_status(ctx, backend).await?;
        return Ok(Action::await_change());
    }

    let namespaced_name = format!(
        "{}/{}",
        service_import.namespace().unwrap_or_default(),
        service_import.name_any()
    );
    let exports = ctx.stores.exports_for_service(&namespaced_name);
    let derived = match derive_endpoints(backend, &service_import, &exports) {
        Derivation::Derived(derived) => derived,
        Derivation::MissingExport { cluster } => {
            set_unknown_condition(
                backend,
                &format!(
                    "Failed to find the exported service {namespaced_name:?} for {cluster:?}"
                ),
            );
            update_status(ctx, backend).await?;
            return Ok(Action::await_change());
        }
    };

    // Register the cleanup finalizer only right before mutating the cloud, so
    // a backend whose endpoints can never be created (for example a 403 from
    // a wrong resource group) does not get stuck on deletion.
    if !contains_finalizer(backend, TRAFFIC_MANAGER_BACKEND_CLEANUP_FINALIZER) {
        let api: Api<TrafficManagerBackend> = Api::namespaced(
            ctx.client.clone(),
            &backend.namespace().unwrap_or_default(),
        );
        *backend = ensure_finalizer(&api, backend, TRAFFIC_MANAGER_BACKEND_CLEANUP_FINALIZER)
            .await
            .context("failed to add finalizer to trafficManagerBackend")?;
    }

    let outcome = match converge_endpoints(
        ctx.cloud.as_ref(),
        resource_group,
        backend,
        &atm_profile,
        derived.desired,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            publish_event(
                ctx,
                backend,
                EventType::Warning,
                EVENT_REASON_AZURE_API_ERROR,
                err.message.clone(),
            )
            .await;
            set_unknown_condition(backend, &err.message);
            update_status(ctx, backend).await?;
            return Err(err.source.into());
        }
    };

    for name in &outcome.created {
        publish_event(
            ctx,
            backend,
            EventType::Normal,
            EVENT_REASON_ACCEPTED,
            format!("Successfully created or updated Azure Traffic Manager endpoint {name:?}"),
        )
        .await;
    }
    for err in &outcome.bad_endpoints {
        publish_event(
            ctx,
            backend,
            EventType::Warning,
            EVENT_REASON_AZURE_API_ERROR,
            format!("Failed to create or update Azure Traffic Manager endpoint: {err}"),
        )
        .await;
    }

    let ConvergeOutcome {
        accepted,
        bad_endpoints,
        ..
    } = outcome;
    if derived.invalid_by_cluster.is_empty() && bad_endpoints.is_empty() {
        set_true_condition(backend, accepted);
    } else {
        let message = rejection_message(&bad_endpoints, &derived.invalid_by_cluster);
        set_false_condition(backend, accepted, &message);
    }
    info!(
        trafficManagerBackend = %backend.name_any(),
        "Updated Traffic Manager endpoints for the serviceImport and updating the condition"
    );
    update_status(ctx, backend).await?;

    // Bad endpoints retry with backoff; invalid exported services alone do
    // not, their fix arrives through the export watch.
    if bad_endpoints.is_empty() {
        Ok(Action::await_change())
    } else {
        let joined = bad_endpoints
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(anyhow::anyhow!(
            "{} endpoint(s) rejected by Azure Traffic Manager: {joined}",
            bad_endpoints.len()
        ))
    }
}

/// Render the `Accepted=False` message for a pass with rejected endpoints
/// and/or ineligible exported services: the count and one sample of each.
fn rejection_message(
    bad_endpoints: &[crate::azure::CloudError],
    invalid_by_cluster: &std::collections::BTreeMap<String, String>,
) -> String {
    let mut message = String::new();
    if let Some(first) = bad_endpoints.first() {
        message.push_str(&format!(
            "{} endpoint(s) failed to be created/updated in the Azure Traffic Manager, for example, {first}; ",
            bad_endpoints.len()
        ));
    }
    if let Some((cluster, reason)) = invalid_by_cluster.iter().next() {
        message.push_str(&format!(
            "{} service(s) exported from clusters cannot be exposed as the Azure Traffic Manager, for example, service exported from {cluster} is invalid: {reason}",
            invalid_by_cluster.len()
        ));
    }
    message
}

// ============================================================================
// Validation stages
// ============================================================================

/// Resolve the referenced profile and require `Programmed=True` at its
/// current generation.
async fn validate_profile(
    ctx: &Context,
    backend: &mut TrafficManagerBackend,
) -> Result<Stage<TrafficManagerProfile>> {
    let profile_name = backend.spec.profile.name.clone();
    let api: Api<TrafficManagerProfile> = Api::namespaced(
        ctx.client.clone(),
        &backend.namespace().unwrap_or_default(),
    );
    let profile = match api.get_opt(&profile_name).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            debug!(trafficManagerProfile = %profile_name, "NotFound trafficManagerProfile");
            set_false_condition(
                backend,
                vec![],
                &format!("TrafficManagerProfile {profile_name:?} is not found"),
            );
            update_status(ctx, backend).await?;
            return Ok(Stage::Done);
        }
        Err(err) => {
            error!(error = %err, trafficManagerProfile = %profile_name, "Failed to get trafficManagerProfile");
            set_unknown_condition(
                backend,
                &format!("Failed to get the trafficManagerProfile {profile_name:?}: {err}"),
            );
            update_status(ctx, backend).await?;
            return Err(err).context("failed to get trafficManagerProfile");
        }
    };

    let conditions = profile
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    let programmed = find_condition(conditions, CONDITION_PROGRAMMED);
    let generation = profile.metadata.generation;
    if is_condition_true(programmed, generation) {
        return Ok(Stage::Proceed(profile));
    }
    if is_condition_false(programmed, generation) {
        set_false_condition(
            backend,
            vec![],
            &format!(
                "Invalid trafficManagerProfile {profile_name:?}, please check the trafficManagerProfile status"
            ),
        );
    } else {
        set_unknown_condition(
            backend,
            &format!("In the processing of trafficManagerProfile {profile_name:?}"),
        );
    }
    debug!(
        trafficManagerProfile = %profile_name,
        "Profile has not been accepted and updating the status"
    );
    update_status(ctx, backend).await?;
    Ok(Stage::Done)
}

/// GET the Azure profile by its deterministic name under the profile's
/// resource group and require existence.
async fn validate_cloud_profile(
    ctx: &Context,
    backend: &mut TrafficManagerBackend,
    profile: &TrafficManagerProfile,
) -> Result<Stage<azure::Profile>> {
    let atm_profile_name = azure::profile_name(&profile.uid().unwrap_or_default());
    let resource_group = profile.spec.resource_group.as_str();
    match ctx.cloud.get_profile(resource_group, &atm_profile_name).await {
        Ok(atm_profile) => {
            debug!(
                resourceGroup = resource_group,
                atmProfileName = %atm_profile_name,
                "Found the valid Azure Traffic Manager profile"
            );
            Ok(Stage::Proceed(atm_profile))
        }
        Err(err) => {
            error!(
                error = %err,
                resourceGroup = resource_group,
                atmProfileName = %atm_profile_name,
                "Failed to get Azure Traffic Manager profile"
            );
            publish_event(
                ctx,
                backend,
                EventType::Warning,
                EVENT_REASON_AZURE_API_ERROR,
                format!(
                    "Failed to get Azure Traffic Manager profile {atm_profile_name:?} under {resource_group:?}: {err}"
                ),
            )
            .await;
            if err.is_not_found() {
                // Either the Azure profile was deleted out of band (a retry
                // cannot bring it back) or the TrafficManagerProfile status
                // is stale (its next update re-triggers us).
                set_false_condition(
                    backend,
                    vec![],
                    &format!(
                        "Azure Traffic Manager profile {atm_profile_name:?} under {resource_group:?} is not found"
                    ),
                );
                update_status(ctx, backend).await?;
                return Ok(Stage::Done);
            }
            set_unknown_condition(
                backend,
                &format!(
                    "Failed to get the Azure Traffic Manager profile {atm_profile_name:?} under {resource_group:?}: {err}"
                ),
            );
            update_status(ctx, backend).await?;
            Err(err.into())
        }
    }
}

/// Resolve the referenced service import; its absence deletes any stale
/// endpoints this backend still owns in the cloud profile.
async fn validate_service_import(
    ctx: &Context,
    resource_group: &str,
    backend: &mut TrafficManagerBackend,
    atm_profile: &azure::Profile,
) -> Result<Stage<ServiceImport>> {
    let import_name = backend.spec.backend.name.clone();
    let api: Api<ServiceImport> = Api::namespaced(
        ctx.client.clone(),
        &backend.namespace().unwrap_or_default(),
    );
    match api.get_opt(&import_name).await {
        Ok(Some(service_import)) => {
            debug!(
                serviceImport = %import_name,
                "Found the serviceImport"
            );
            Ok(Stage::Proceed(service_import))
        }
        Ok(None) => {
            info!(
                serviceImport = %import_name,
                "NotFound serviceImport and starting deleting any stale endpoints"
            );
            if let Err(err) =
                cleanup_endpoints(ctx.cloud.as_ref(), resource_group, backend, atm_profile).await
            {
                publish_event(
                    ctx,
                    backend,
                    EventType::Warning,
                    EVENT_REASON_AZURE_API_ERROR,
                    format!("Failed to delete stale endpoints for an invalid serviceImport: {err}"),
                )
                .await;
                return Err(err).context("failed to delete stale endpoints");
            }
            set_false_condition(
                backend,
                vec![],
                &format!("ServiceImport {import_name:?} is not found"),
            );
            update_status(ctx, backend).await?;
            Ok(Stage::Done)
        }
        Err(err) => {
            error!(error = %err, serviceImport = %import_name, "Failed to get serviceImport");
            set_unknown_condition(
                backend,
                &format!("Failed to get the serviceImport {import_name:?}: {err}"),
            );
            update_status(ctx, backend).await?;
            Err(err).context("failed to get serviceImport")
        }
    }
}

// ============================================================================
// Deletion path
// ============================================================================

/// Handle a backend with a deletion timestamp: clean up owned cloud
/// endpoints if the cleanup finalizer is present, drop the per-backend metric
/// series, and remove both finalizers.
///
/// # Errors
///
/// Returns an error when cloud cleanup or the finalizer update fails; the
/// deletion is retried.
pub async fn handle_delete(ctx: &Context, backend: &TrafficManagerBackend) -> Result<Action> {
    let mut to_remove: Vec<&str> = Vec::new();

    if contains_finalizer(backend, METRICS_FINALIZER) {
        debug!(
            trafficManagerBackend = %backend.name_any(),
            "TrafficManagerBackend is being deleted and cleaning up its metrics"
        );
        crate::metrics::forget_backend_status(
            &backend.namespace().unwrap_or_default(),
            &backend.name_any(),
        );
        to_remove.push(METRICS_FINALIZER);
    }

    if contains_finalizer(backend, TRAFFIC_MANAGER_BACKEND_CLEANUP_FINALIZER) {
        if let Err(err) = delete_azure_endpoints(ctx, backend).await {
            publish_event(
                ctx,
                backend,
                EventType::Warning,
                EVENT_REASON_AZURE_API_ERROR,
                format!("Failed to delete Azure Traffic Manager endpoints: {err}"),
            )
            .await;
            error!(
                error = %err,
                trafficManagerBackend = %backend.name_any(),
                "Failed to delete Azure Traffic Manager endpoints"
            );
            return Err(err);
        }
        publish_event(
            ctx,
            backend,
            EventType::Normal,
            EVENT_REASON_DELETED,
            "Deleted Azure Traffic Manager endpoints".to_string(),
        )
        .await;
        to_remove.push(TRAFFIC_MANAGER_BACKEND_CLEANUP_FINALIZER);
    }

    if to_remove.is_empty() {
        debug!(
            trafficManagerBackend = %backend.name_any(),
            "No need to remove finalizer"
        );
        return Ok(Action::await_change());
    }

    let api: Api<TrafficManagerBackend> = Api::namespaced(
        ctx.client.clone(),
        &backend.namespace().unwrap_or_default(),
    );
    remove_finalizers(&api, backend, &to_remove)
        .await
        .context("failed to remove trafficManagerBackend finalizers")?;
    info!(
        trafficManagerBackend = %backend.name_any(),
        "Removed trafficManagerBackend finalizers"
    );
    Ok(Action::await_change())
}

/// Delete the Azure endpoints owned by the backend, treating a missing
/// profile (Kubernetes or Azure side) as already-cleaned-up.
async fn delete_azure_endpoints(ctx: &Context, backend: &TrafficManagerBackend) -> Result<()> {
    let profile_name = backend.spec.profile.name.clone();
    let api: Api<TrafficManagerProfile> = Api::namespaced(
        ctx.client.clone(),
        &backend.namespace().unwrap_or_default(),
    );
    let profile = match api.get_opt(&profile_name).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            debug!(
                trafficManagerProfile = %profile_name,
                "NotFound trafficManagerProfile and Azure resources should be deleted"
            );
            return Ok(());
        }
        Err(err) => {
            return Err(err).context("failed to get trafficManagerProfile during deletion");
        }
    };

    let atm_profile_name = azure::profile_name(&profile.uid().unwrap_or_default());
    let resource_group = profile.spec.resource_group.as_str();
    let atm_profile = match ctx.cloud.get_profile(resource_group, &atm_profile_name).await {
        Ok(atm_profile) => atm_profile,
        Err(err) if err.is_not_found() => {
            debug!(
                atmProfileName = %atm_profile_name,
                "Azure Traffic Manager profile does not exist"
            );
            return Ok(());
        }
        Err(err) => {
            return Err(err).context("failed to get the Traffic Manager profile during deletion");
        }
    };

    cleanup_endpoints(ctx.cloud.as_ref(), resource_group, backend, &atm_profile)
        .await
        .context("failed to delete Azure Traffic Manager endpoints")
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod backend_tests;
