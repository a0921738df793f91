// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

pub mod backend;
pub mod endpoints;
pub mod finalizers;
pub mod status;

pub use backend::{handle_delete, handle_update, Stage};
