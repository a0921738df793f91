// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Fleetsteer - Multi-Cluster Traffic Manager Controller
//!
//! Fleetsteer is a hub-cluster Kubernetes controller written in Rust that
//! exposes services exported from member clusters of a fleet through an Azure
//! Traffic Manager profile.
//!
//! ## Overview
//!
//! Member clusters publish load-balancer services as `InternalServiceExport`
//! objects; the hub aggregates them into `ServiceImport` objects. A user binds
//! a service import to a `TrafficManagerProfile` by creating a
//! `TrafficManagerBackend`, and this controller programs the Azure Traffic
//! Manager profile with one endpoint per exporting cluster, with weights
//! redistributed from the per-cluster export weights and the overall backend
//! weight.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`azure`] - Azure Traffic Manager REST client and wire types
//! - [`reconcilers`] - Reconciliation logic for `TrafficManagerBackend`
//! - [`backend_controller`] - Controller wiring, watches and event fan-out
//! - [`metrics`] - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleetsteer::crd::{
//!     TrafficManagerBackendRef, TrafficManagerBackendSpec, TrafficManagerProfileRef,
//! };
//!
//! let spec = TrafficManagerBackendSpec {
//!     profile: TrafficManagerProfileRef {
//!         name: "my-profile".to_string(),
//!     },
//!     backend: TrafficManagerBackendRef {
//!         name: "my-service".to_string(),
//!     },
//!     weight: Some(100),
//! };
//! ```

pub mod azure;
pub mod backend_controller;
pub mod constants;
pub mod context;
pub mod crd;
pub mod metrics;
pub mod reconcilers;
