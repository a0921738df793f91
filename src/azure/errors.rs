// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure API error classification.
//!
//! The reconciler treats cloud failures very differently depending on their
//! shape, so the error type preserves the HTTP status and the ARM error code
//! instead of flattening everything into a string:
//!
//! - not-found is a normal state transition, never retried as an error
//! - throttling and server errors are transient, requeued with backoff
//! - other client errors on an endpoint PUT mark that endpoint bad without
//!   blocking the rest of the pass
//! - transport errors (no HTTP response at all) are always transient

use reqwest::StatusCode;
use thiserror::Error;

/// ARM error code returned when a request is throttled.
const ERROR_CODE_TOO_MANY_REQUESTS: &str = "TooManyRequests";

/// Error returned by the Azure Traffic Manager client.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The Azure API answered with a non-success status.
    #[error("Azure API error {status}{}: {message}", code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// ARM error code from the response body, when present.
        code: Option<String>,
        /// ARM error message from the response body, or the raw body.
        message: String,
    },

    /// The request never produced an HTTP response.
    #[error("failed to reach the Azure API: {0}")]
    Transport(#[from] reqwest::Error),

    /// Acquiring an ARM token failed.
    #[error("Azure authentication failed: {0}")]
    Auth(String),
}

impl CloudError {
    /// Build an API error from a status code and the ARM error envelope
    /// fields.
    #[must_use]
    pub fn api(status: StatusCode, code: Option<String>, message: String) -> Self {
        CloudError::Api {
            status: status.as_u16(),
            code,
            message,
        }
    }

    /// The requested resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::Api { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
    }

    /// The API rejected the request as malformed or unauthorized (any 4xx).
    ///
    /// Note that throttling responses are also 4xx; callers deciding whether
    /// to retry must check [`CloudError::is_throttled`] as well.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, CloudError::Api { status, .. } if (400..500).contains(status))
    }

    /// The API throttled the request.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        match self {
            CloudError::Api { status, code, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || code.as_deref() == Some(ERROR_CODE_TOO_MANY_REQUESTS)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
