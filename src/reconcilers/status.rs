// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for Kubernetes resources.
//!
//! This module provides utility functions for creating and managing Kubernetes
//! status conditions following the standard conventions.
//!
//! # Condition Format
//!
//! Kubernetes conditions follow a standard format:
//! - `type`: The aspect of the resource being reported (e.g., "Accepted")
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `observedGeneration`: The generation the condition was computed against
//! - `lastTransitionTime`: RFC3339 timestamp when the status last changed

use crate::crd::Condition;
use chrono::Utc;

/// Create a new Kubernetes condition with the current timestamp.
///
/// # Arguments
///
/// * `condition_type` - The type of condition (e.g., "Accepted")
/// * `status` - The status: "True", "False", or "Unknown"
/// * `reason` - A programmatic identifier in `CamelCase` (e.g., "`Pending`")
/// * `message` - A human-readable explanation
/// * `observed_generation` - Generation of the resource being reported on
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        observed_generation,
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Merge a condition into a condition list, preserving the transition time
/// when the status did not actually change.
///
/// Mirrors the behavior users expect from `kubectl describe`: the
/// `lastTransitionTime` answers "since when has this been True", not "when
/// did the controller last write status".
pub fn set_status_condition(conditions: &mut Vec<Condition>, mut new_condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.r#type == new_condition.r#type)
    {
        Some(existing) => {
            if existing.status == new_condition.status {
                new_condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = new_condition;
        }
        None => conditions.push(new_condition),
    }
}

/// Find a condition by type in a list of conditions.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Whether the condition is present, `True`, and current for `generation`.
///
/// A condition reported against an older generation is stale: the spec has
/// changed since it was computed and it proves nothing about the current
/// spec.
#[must_use]
pub fn is_condition_true(condition: Option<&Condition>, generation: Option<i64>) -> bool {
    condition.is_some_and(|c| {
        c.status == crate::crd::CONDITION_STATUS_TRUE && c.observed_generation == generation
    })
}

/// Whether the condition is present, `False`, and current for `generation`.
#[must_use]
pub fn is_condition_false(condition: Option<&Condition>, generation: Option<i64>) -> bool {
    condition.is_some_and(|c| {
        c.status == crate::crd::CONDITION_STATUS_FALSE && c.observed_generation == generation
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
