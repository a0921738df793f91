// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for Kubernetes resources.
//!
//! The backend lifecycle uses two independent finalizer tokens: one guarding
//! Azure endpoint cleanup and one guarding metric series cleanup. This module
//! provides the generic add/remove plumbing; the ordering rules (when each
//! token is added and removed) live in the backend reconciler.
//!
//! Adding a token uses a JSON merge patch of the finalizer list. Removal is a
//! full-object update carrying the resourceVersion, with 409 conflicts
//! swallowed: the removal lost a race against another writer and the next
//! watch-driven pass re-reads and retries with fresh state.

use anyhow::Result;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Whether the resource carries the finalizer.
#[must_use]
pub fn contains_finalizer<T: ResourceExt>(resource: &T, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// Add a finalizer to a resource if not already present and persist it.
///
/// Returns the resource as stored after the patch (or a clone of the input
/// when the finalizer was already present), so callers continue working with
/// an object the API server has acknowledged.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn ensure_finalizer<T>(api: &Api<T>, resource: &T, finalizer: &str) -> Result<T>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
{
    if contains_finalizer(resource, finalizer) {
        return Ok(resource.clone());
    }

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_string());

    debug!(
        resource = %resource.name_any(),
        finalizer,
        "Adding finalizer"
    );
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    let patched = api
        .patch(
            &resource.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
    Ok(patched)
}

/// Remove the given finalizer tokens from a resource and persist the result
/// with a conflict-tolerant full-object update.
///
/// Tokens the resource does not carry are ignored. When nothing changes, no
/// API call is made. A 409 conflict is swallowed: the write that won the race
/// retriggers the watch, and the next pass re-reads and retries.
///
/// # Errors
///
/// Returns an error if the update fails for any reason other than a conflict.
pub async fn remove_finalizers<T>(api: &Api<T>, resource: &T, tokens: &[&str]) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
{
    let remaining: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| !tokens.contains(&f.as_str()))
        .cloned()
        .collect();
    if remaining.len() == resource.finalizers().len() {
        return Ok(());
    }

    debug!(
        resource = %resource.name_any(),
        ?tokens,
        "Removing finalizers"
    );
    let mut updated = resource.clone();
    updated.meta_mut().finalizers = (!remaining.is_empty()).then_some(remaining);
    let result = api
        .replace(&resource.name_any(), &PostParams::default(), &updated)
        .await;
    if ignore_conflict(result)?.is_none() {
        debug!(
            resource = %resource.name_any(),
            "Finalizer removal lost a conflict, the next pass retries"
        );
    }
    Ok(())
}

/// Whether a kube error is a resourceVersion conflict (HTTP 409).
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

/// Swallow version conflicts on an update: the write lost a race and the next
/// watch-driven pass will re-read and retry with fresh state.
///
/// # Errors
///
/// Propagates every error other than a 409 conflict.
pub fn ignore_conflict<T>(result: Result<T, kube::Error>) -> Result<Option<T>, kube::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if is_conflict(&err) => {
            debug!("Ignoring conflict, a newer write won; the next pass re-reads");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
