// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the backend controller with reflector stores.
//!
//! The controller receives an `Arc<Context>` that contains:
//! - Kubernetes client
//! - Reflector stores for the watched resource kinds
//! - The Azure Traffic Manager client
//! - The event reporter identity
//!
//! The stores enable O(1) in-memory lookups in watch mappers and spare the
//! reconciler a live LIST per pass: they are the Rust rendition of the field
//! indexes a controller-runtime manager would install (backends by
//! `spec.profile.name`, backends by `spec.backend.name`, exports by
//! `spec.serviceReference.namespacedName`).

use crate::azure::TrafficManagerApi;
use crate::crd::{InternalServiceExport, ServiceImport, TrafficManagerBackend};
use kube::runtime::events::{Recorder, Reporter};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;

/// Shared context passed to the backend controller.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Reflector stores for watched kinds
    pub stores: Stores,

    /// Azure Traffic Manager client
    pub cloud: Arc<dyn TrafficManagerApi>,

    /// Identity attached to emitted Kubernetes events
    pub reporter: Reporter,
}

impl Context {
    /// Event recorder bound to a backend object.
    #[must_use]
    pub fn recorder(&self, backend: &TrafficManagerBackend) -> Recorder {
        Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            backend.object_ref(&()),
        )
    }
}

/// Collection of reflector stores for cross-object queries.
///
/// Each store is populated by a dedicated reflector fed from the same watcher
/// that drives the corresponding trigger stream, so mapper lookups and
/// reconciler listings see the watch cache, never a live API call.
#[derive(Clone)]
pub struct Stores {
    pub backends: Store<TrafficManagerBackend>,
    pub service_imports: Store<ServiceImport>,
    pub service_exports: Store<InternalServiceExport>,
}

impl Stores {
    /// All backends in `namespace` referencing the named profile.
    ///
    /// Backends and profiles must live in the same namespace, so the lookup
    /// is namespace-scoped.
    #[must_use]
    pub fn backends_referencing_profile(
        &self,
        namespace: &str,
        profile_name: &str,
    ) -> Vec<ObjectRef<TrafficManagerBackend>> {
        self.backends
            .state()
            .iter()
            .filter(|backend| {
                backend.namespace().as_deref() == Some(namespace)
                    && backend.spec.profile.name == profile_name
            })
            .map(|backend| ObjectRef::new(&backend.name_any()).within(namespace))
            .collect()
    }

    /// All backends in `namespace` referencing the named service import.
    #[must_use]
    pub fn backends_referencing_service_import(
        &self,
        namespace: &str,
        service_import_name: &str,
    ) -> Vec<ObjectRef<TrafficManagerBackend>> {
        self.backends
            .state()
            .iter()
            .filter(|backend| {
                backend.namespace().as_deref() == Some(namespace)
                    && backend.spec.backend.name == service_import_name
            })
            .map(|backend| ObjectRef::new(&backend.name_any()).within(namespace))
            .collect()
    }

    /// Get a service import by namespace and name from the store.
    #[must_use]
    pub fn get_service_import(&self, namespace: &str, name: &str) -> Option<Arc<ServiceImport>> {
        self.service_imports
            .get(&ObjectRef::new(name).within(namespace))
    }

    /// All internal service exports publishing the service identified by
    /// `namespace/name` (one per exporting cluster).
    #[must_use]
    pub fn exports_for_service(&self, namespaced_name: &str) -> Vec<Arc<InternalServiceExport>> {
        self.service_exports
            .state()
            .iter()
            .filter(|export| export.spec.service_reference.namespaced_name == namespaced_name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
