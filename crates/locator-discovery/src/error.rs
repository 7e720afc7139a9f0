// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for locator operations.

use thiserror::Error;

/// Result type for locator operations.
pub type LocatorResult<T> = Result<T, LocatorError>;

/// Errors returned by a [`Locator`](crate::locator::Locator).
///
/// The split between [`LocatorError::Remote`] and [`LocatorError::Transport`]
/// drives forwarding: a remote fault is the locator's own answer and is
/// propagated, a transport fault marks the locator as bad and triggers
/// rediscovery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocatorError {
    /// The remote locator answered with an application-level exception.
    #[error("remote exception {code}: {message}")]
    Remote { code: String, message: String },

    /// The locator could not be reached or the connection broke.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The locator's answer could not be understood here: its encoding has
    /// no codec, the payload does not decode, or the reply does not match
    /// the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No locator is available to carry an opaque request.
    #[error("no locator available")]
    NotFound,
}

impl LocatorError {
    /// Create a remote exception.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this error is a local fault attributable to the locator
    /// handle, as opposed to an answer the locator gave.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }
}

impl From<crate::connection::ConnectionError> for LocatorError {
    fn from(e: crate::connection::ConnectionError) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<crate::codec::CodecError> for LocatorError {
    fn from(e: crate::codec::CodecError) -> Self {
        Self::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LocatorError::remote("AdapterNotFound", "no adapter `A`");
        assert_eq!(err.to_string(), "remote exception AdapterNotFound: no adapter `A`");
        assert!(!err.is_transport());

        let err = LocatorError::Transport("connection refused".into());
        assert!(err.to_string().contains("transport"));
        assert!(err.is_transport());
    }

    #[test]
    fn test_local_faults() {
        assert!(LocatorError::Transport("reset".into()).is_local());
        assert!(LocatorError::Protocol("unsupported encoding 2.0".into()).is_local());
        assert!(!LocatorError::remote("UnknownException", "boom").is_local());
        assert!(!LocatorError::NotFound.is_local());
    }
}
