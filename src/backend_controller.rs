// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `TrafficManagerBackend` controller wiring.
//!
//! The reconciler owns its backend watch (generation-filtered, so status-only
//! writes do not self-requeue) and subscribes to three dependency kinds,
//! mapping each event to the affected backends:
//!
//! - `TrafficManagerProfile`: triggers only when the `Programmed` condition's
//!   status or observed generation changes (reason-only changes are noise);
//!   fans out to backends referencing the profile by name in its namespace
//! - `ServiceImport`: triggers only when the status cluster list changes;
//!   fans out to backends referencing the import by name
//! - `InternalServiceExport`: triggers only when a field meaningful to
//!   endpoint derivation changes; fans out through the service import the
//!   export publishes, provided the exporting cluster is listed there
//!
//! Dependency triggers are change-tracked over raw watcher events instead of
//! `predicate_filter` because deletions must always trigger: a backend whose
//! profile or import disappears has to re-validate immediately.
//!
//! Fan-out resolves through the shared reflector stores, never a live LIST.

use crate::constants::{ERROR_REQUEUE_DURATION_SECS, METRICS_FINALIZER};
use crate::context::{Context, Stores};
use crate::crd::{
    set_default_weight, InternalServiceExport, ServiceImport, TrafficManagerBackend,
    TrafficManagerProfile, CONDITION_PROGRAMMED,
};
use crate::metrics::{emit_backend_status, record_reconciliation_error, record_reconciliation_success};
use crate::reconcilers::finalizers::{contains_finalizer, ensure_finalizer};
use crate::reconcilers::status::find_condition;
use crate::reconcilers::{handle_delete, handle_update};
use anyhow::{Context as _, Result};
use futures::{Stream, StreamExt};
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::Reporter;
use kube::runtime::reflector::{self, reflector, ObjectRef};
use kube::runtime::{predicates, watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Reconciliation error wrapper
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] anyhow::Error);

/// Error policy for the backend controller.
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
fn error_policy(
    backend: Arc<TrafficManagerBackend>,
    err: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        error = %err,
        trafficManagerBackend = %backend.name_any(),
        "Reconciliation error - will retry in {}s",
        ERROR_REQUEUE_DURATION_SECS
    );
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

// ============================================================================
// Trigger fingerprints
// ============================================================================

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint of the profile fields backends depend on: the `Programmed`
/// condition's status and observed generation. Reason and message changes do
/// not affect any backend.
#[must_use]
pub fn profile_fingerprint(profile: &TrafficManagerProfile) -> u64 {
    let programmed = profile
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_PROGRAMMED));
    hash_of(&programmed.map(|c| (c.status.clone(), c.observed_generation)))
}

/// Fingerprint of the service import fields backends depend on: the status
/// cluster list.
#[must_use]
pub fn service_import_fingerprint(service_import: &ServiceImport) -> u64 {
    let clusters: Option<Vec<&str>> = service_import
        .status
        .as_ref()
        .map(|s| s.clusters.iter().map(|c| c.cluster.as_str()).collect());
    hash_of(&clusters)
}

/// Fingerprint of the export fields that feed endpoint derivation. The
/// service reference is immutable, so only the mutable eligibility and
/// weight fields participate.
#[must_use]
pub fn export_fingerprint(export: &InternalServiceExport) -> u64 {
    hash_of(&(
        export.spec.r#type.as_str(),
        export.spec.is_dns_label_configured,
        export.spec.is_internal_load_balancer,
        export.spec.public_ip_resource_id.as_deref(),
        export.spec.weight,
    ))
}

/// Filter a watcher event stream down to objects whose fingerprint changed.
///
/// The initial listing primes the fingerprint cache without triggering (every
/// backend reconciles at startup through its own watch anyway). The first
/// sight of an object created later triggers, updates trigger only when the
/// fingerprint moved, and deletions always trigger.
pub fn trigger_on_change<K, F>(
    events: impl Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    fingerprint: F,
) -> impl Stream<Item = Result<K, watcher::Error>>
where
    K: Resource,
    K::DynamicType: Default + Eq + Hash,
    F: Fn(&K) -> u64,
{
    let mut seen: HashMap<ObjectRef<K>, u64> = HashMap::new();
    events.filter_map(move |event| {
        let out = match event {
            Err(err) => Some(Err(err)),
            Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
            Ok(watcher::Event::InitApply(obj)) => {
                seen.insert(ObjectRef::from_obj(&obj), fingerprint(&obj));
                None
            }
            Ok(watcher::Event::Apply(obj)) => {
                let key = ObjectRef::from_obj(&obj);
                let current = fingerprint(&obj);
                match seen.insert(key, current) {
                    Some(previous) if previous == current => None,
                    _ => Some(Ok(obj)),
                }
            }
            Ok(watcher::Event::Delete(obj)) => {
                seen.remove(&ObjectRef::from_obj(&obj));
                Some(Ok(obj))
            }
        };
        futures::future::ready(out)
    })
}

// ============================================================================
// Event fan-out
// ============================================================================

/// Backends affected by a profile event: every backend in the profile's
/// namespace referencing it by name.
#[must_use]
pub fn map_profile_event(
    stores: &Stores,
    profile: &TrafficManagerProfile,
) -> Vec<ObjectRef<TrafficManagerBackend>> {
    let namespace = profile.namespace().unwrap_or_default();
    let refs = stores.backends_referencing_profile(&namespace, &profile.name_any());
    debug!(
        trafficManagerProfile = %profile.name_any(),
        backends = refs.len(),
        "Fanning out trafficManagerProfile event"
    );
    refs
}

/// Backends affected by a service import event: every backend in the
/// import's namespace referencing it by name.
#[must_use]
pub fn map_service_import_event(
    stores: &Stores,
    service_import: &ServiceImport,
) -> Vec<ObjectRef<TrafficManagerBackend>> {
    let namespace = service_import.namespace().unwrap_or_default();
    let refs = stores.backends_referencing_service_import(&namespace, &service_import.name_any());
    debug!(
        serviceImport = %service_import.name_any(),
        backends = refs.len(),
        "Fanning out serviceImport event"
    );
    refs
}

/// Backends affected by an export event: resolved through the service import
/// the export publishes, but only when the exporting cluster appears in the
/// import's cluster list. A cluster absent from the list is either still
/// being admitted or was rejected for a conflicting spec; in both cases the
/// import's own update triggers the backends when it matters.
#[must_use]
pub fn map_export_event(
    stores: &Stores,
    export: &InternalServiceExport,
) -> Vec<ObjectRef<TrafficManagerBackend>> {
    let reference = &export.spec.service_reference;
    let Some(service_import) = stores.get_service_import(&reference.namespace, &reference.name)
    else {
        debug!(
            serviceImport = %reference.namespaced_name,
            "No serviceImport for the internalServiceExport event"
        );
        return vec![];
    };
    let listed = service_import
        .status
        .as_ref()
        .is_some_and(|s| s.clusters.iter().any(|c| c.cluster == reference.cluster_id));
    if !listed {
        return vec![];
    }
    map_service_import_event(stores, &service_import)
}

// ============================================================================
// Reconcile entry
// ============================================================================

/// Reconcile a single `TrafficManagerBackend`.
///
/// # Errors
///
/// Returns an error to requeue the backend with backoff.
pub async fn reconcile(
    backend: Arc<TrafficManagerBackend>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let namespace = backend.namespace().unwrap_or_default();
    let name = backend.name_any();
    debug!(
        trafficManagerBackend = %name,
        namespace = %namespace,
        "Reconciliation starts"
    );

    let result = reconcile_inner(&ctx, &namespace, &name).await;

    let latency = start.elapsed();
    match &result {
        Ok(_) => record_reconciliation_success(latency),
        Err(err) => {
            record_reconciliation_error(latency);
            error!(
                error = %err,
                trafficManagerBackend = %name,
                "Failed to reconcile trafficManagerBackend"
            );
        }
    }
    debug!(
        trafficManagerBackend = %name,
        latency_ms = latency.as_millis() as u64,
        "Reconciliation ends"
    );
    result.map_err(ReconcileError::from)
}

async fn reconcile_inner(ctx: &Context, namespace: &str, name: &str) -> Result<Action> {
    let api: Api<TrafficManagerBackend> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(mut backend) = api
        .get_opt(name)
        .await
        .context("failed to get trafficManagerBackend")?
    else {
        debug!(trafficManagerBackend = %name, "Ignoring NotFound trafficManagerBackend");
        return Ok(Action::await_change());
    };

    if backend.metadata.deletion_timestamp.is_some() {
        return handle_delete(ctx, &backend).await;
    }

    // The metrics finalizer is registered on first observation, independent
    // of the cloud cleanup finalizer, so the series teardown runs even for
    // backends that never reached the cloud.
    if !contains_finalizer(&backend, METRICS_FINALIZER) {
        backend = ensure_finalizer(&api, &backend, METRICS_FINALIZER)
            .await
            .context("failed to add trafficManagerBackend metrics finalizer")?;
    }

    set_default_weight(&mut backend);
    let result = handle_update(ctx, &mut backend).await;
    emit_backend_status(&backend);
    result
}

// ============================================================================
// Controller wiring
// ============================================================================

/// Run the `TrafficManagerBackend` controller until shutdown.
///
/// # Errors
///
/// Returns an error if the controller cannot be set up; a running controller
/// only terminates on signal.
pub async fn run(client: Client, cloud: Arc<dyn crate::azure::TrafficManagerApi>) -> Result<()> {
    info!("Starting TrafficManagerBackend controller");

    let backends_api = Api::<TrafficManagerBackend>::all(client.clone());
    let profiles_api = Api::<TrafficManagerProfile>::all(client.clone());
    let imports_api = Api::<ServiceImport>::all(client.clone());
    let exports_api = Api::<InternalServiceExport>::all(client.clone());

    let cfg = watcher::Config::default().any_semantic();

    // Main watch: reflector-backed, generation-filtered so status writes do
    // not self-requeue. Setting the deletion timestamp bumps the generation,
    // so deletions still reconcile.
    let (backends, backends_writer) = reflector::store();
    let backend_stream = reflector(backends_writer, watcher(backends_api, cfg.clone()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);

    // Dependency watches share one watcher each between the reflector store
    // and the change-tracked trigger stream.
    let profile_trigger =
        trigger_on_change(watcher(profiles_api, cfg.clone()).default_backoff(), profile_fingerprint);

    let (service_imports, imports_writer) = reflector::store();
    let import_trigger = trigger_on_change(
        reflector(imports_writer, watcher(imports_api, cfg.clone())).default_backoff(),
        service_import_fingerprint,
    );

    let (service_exports, exports_writer) = reflector::store();
    let export_trigger = trigger_on_change(
        reflector(exports_writer, watcher(exports_api, cfg)).default_backoff(),
        export_fingerprint,
    );

    let stores = Stores {
        backends: backends.clone(),
        service_imports,
        service_exports,
    };
    let ctx = Arc::new(Context {
        client,
        stores: stores.clone(),
        cloud,
        reporter: Reporter {
            controller: "trafficmanagerbackend-controller".to_string(),
            instance: std::env::var("POD_NAME").ok(),
        },
    });

    let profile_stores = stores.clone();
    let import_stores = stores.clone();
    let export_stores = stores;
    Controller::for_stream(backend_stream, backends)
        .shutdown_on_signal()
        .watches_stream(profile_trigger, move |profile: TrafficManagerProfile| {
            map_profile_event(&profile_stores, &profile)
        })
        .watches_stream(import_trigger, move |service_import: ServiceImport| {
            map_service_import_event(&import_stores, &service_import)
        })
        .watches_stream(export_trigger, move |export: InternalServiceExport| {
            map_export_event(&export_stores, &export)
        })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((backend, _action)) => {
                    debug!(trafficManagerBackend = %backend.name, "Reconciled trafficManagerBackend");
                }
                Err(err) => {
                    debug!(error = %err, "Reconcile dispatch failed");
                }
            }
        })
        .await;

    info!("TrafficManagerBackend controller stopped");
    Ok(())
}
