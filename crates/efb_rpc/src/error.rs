//! RPC error types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A request rejected before anything was published
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// ICAO codes are exactly four ASCII letters or digits
    #[error("invalid ICAO code {0:?}: expected exactly 4 letters or digits")]
    Icao(String),

    #[error("pilot id must not be empty")]
    EmptyPilotId,

    #[error("failure id must not be empty")]
    EmptyFailureId,
}

/// Failure category reported by the responder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// No data for the requested identifier
    NotFound,
    /// The request failed the responder's own validation
    Rejected,
    /// The backing system is not available
    Unavailable,
    Internal,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::Rejected => "rejected",
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::Internal => "internal error",
        })
    }
}

/// Failure half of a discriminated reply
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Internal, message)
    }
}

/// Errors surfaced by [`RpcClient`](crate::RpcClient) calls
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// No reply within the call's timeout
    #[error("{call} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        call: &'static str,
        timeout: Duration,
    },

    /// The responder answered with a failure
    #[error("{call} failed remotely: {source}")]
    Remote {
        call: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("malformed {call} payload: {source}")]
    Codec {
        call: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The client went away while the call was pending
    #[error("{call} was abandoned before a reply arrived")]
    Abandoned { call: &'static str },
}

impl RpcError {
    /// The remote failure, if this is one
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            RpcError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}
