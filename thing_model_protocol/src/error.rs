// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Error types for thing model operations.

use std::time::Duration;

use thing_model_transport::error::TransportError;
use thiserror::Error;

/// Result code carried by a successful response envelope.
pub const CODE_SUCCESS: i32 = 200;

/// Represents an error that occurred in a thing model operation.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct DmError(#[from] DmErrorKind);

impl DmError {
    /// Returns the [`DmErrorKind`] of the error as a reference.
    #[must_use]
    pub fn kind(&self) -> &DmErrorKind {
        &self.0
    }

    /// Returns the [`DmErrorKind`] of the error.
    #[must_use]
    pub fn consuming_kind(self) -> DmErrorKind {
        self.0
    }
}

/// Represents the kinds of errors that occur in thing model operations.
#[derive(Debug, Error)]
pub enum DmErrorKind {
    /// An argument provided for a request was invalid.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// No entry exists for the requested key or index.
    #[error("not found")]
    NotFound,
    /// A local wait for a response exceeded its timeout.
    #[error("wait for response timed out after {0:?}")]
    WaitTimeout(Duration),
    /// A pending request expired before any response arrived.
    ///
    /// Only surfaced through
    /// [`EventCallback::request_wait_response_timeout`](crate::EventCallback::request_wait_response_timeout).
    #[error("request expired waiting for a response")]
    RequestWaitResponseTimeout,
    /// A topic has fewer levels than its handler requires.
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    /// The remote end answered with a non-success code.
    #[error(transparent)]
    Protocol(#[from] CodeError),
    /// The operation requires a feature or mode that is not enabled.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(&'static str),
    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Encoding(#[from] serde_json::Error),
    /// The transport failed to carry out an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A non-success result code together with its message.
///
/// The same value is delivered to a waiting caller and to the event callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code {code}: {message}")]
pub struct CodeError {
    /// Result code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl CodeError {
    /// Create a new [`CodeError`]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convert a result code into an error, returning `None` for [`CODE_SUCCESS`].
    #[must_use]
    pub fn from_code(code: i32, message: &str) -> Option<Self> {
        if code == CODE_SUCCESS {
            None
        } else {
            Some(Self::new(code, message))
        }
    }
}
