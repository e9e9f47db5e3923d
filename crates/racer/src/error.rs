// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the engine.
//!
//! Mirrors the error categories called out in the design: configuration
//! mistakes are returned to the caller at construction time, everything
//! else that reaches a `Result` is either fatal (transport, protocol) or
//! already resolved locally before it could become an error (resource
//! pressure, reordering).

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine.
#[derive(Debug)]
pub enum EngineError {
    /// Bad sizes, mismatched peer counts, or other construction-time
    /// misconfiguration. Recoverable: reject construction, nothing was
    /// started.
    Configuration(String),

    /// A verbs/QP failure, registration failure, or other unrecoverable
    /// transport condition. The engine's threads have been (or are being)
    /// torn down.
    TransportFatal(String),

    /// A stale ready_flag observed after fence, an out-of-range peer
    /// index, or another condition that indicates the protocol's
    /// invariants were violated. Always fatal.
    ProtocolViolation(String),
}

impl EngineError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn transport_fatal(msg: impl Into<String>) -> Self {
        Self::TransportFatal(msg.into())
    }

    pub(crate) fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "engine configuration error: {msg}"),
            Self::TransportFatal(msg) => write!(f, "fatal transport error: {msg}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
