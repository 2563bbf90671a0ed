//! Crate-wide error types for the resolution pipeline.
//!
//! Mirrors the layered error design of the teacher crate's `error::app`
//! module: one small struct per failure kind carrying just the context
//! needed for logging, unified under a single enum so every stage can
//! propagate through `?` without losing which stage failed.

use std::fmt;

/// Result alias using the crate's [`CoreError`] as the error type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// A query/transport failure from a single upstream (timeout, connection
/// refused, malformed wire response).
#[derive(Debug)]
pub struct UpstreamErrorStruct {
    pub upstream: String,
    pub msg: String,
}

/// DNSSEC chain-of-trust construction or verification failure.
#[derive(Debug)]
pub struct ValidationErrorStruct {
    pub fqdn: String,
    pub msg: String,
}

/// Invalid configuration supplied at chain-construction time.
#[derive(Debug)]
pub struct ConfigErrorStruct {
    pub field: String,
    pub msg: String,
}

/// An operation against process-wide state (blocking enable/disable,
/// shared-cache message) that failed without changing state.
#[derive(Debug)]
pub struct OperationalErrorStruct {
    pub operation: String,
    pub msg: String,
}

/// Unified error type for all pipeline failures.
#[derive(Debug)]
pub enum CoreError {
    /// Transient upstream failure: timeout, network error, protocol error.
    Upstream(UpstreamErrorStruct),
    /// DNSSEC validation could not complete (as opposed to completing with
    /// a Bogus verdict, which is a successful terminal response).
    Validation(ValidationErrorStruct),
    /// Fatal at chain-construction time: invalid block type, unreachable
    /// list source under `failOnError`, invalid bootstrap upstream, etc.
    Config(ConfigErrorStruct),
    /// Reported to the caller with state unchanged: unknown group name,
    /// malformed shared-cache message.
    Operational(OperationalErrorStruct),
    /// The inbound request's cancellation token fired before a terminal
    /// response was produced.
    Cancelled,
}

impl CoreError {
    pub fn upstream(upstream: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream(UpstreamErrorStruct {
            upstream: upstream.into(),
            msg: msg.into(),
        })
    }

    pub fn validation(fqdn: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation(ValidationErrorStruct {
            fqdn: fqdn.into(),
            msg: msg.into(),
        })
    }

    pub fn config(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config(ConfigErrorStruct {
            field: field.into(),
            msg: msg.into(),
        })
    }

    pub fn operational(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Operational(OperationalErrorStruct {
            operation: operation.into(),
            msg: msg.into(),
        })
    }

    /// True for errors that should fold into the delegation path rather
    /// than bubble up as a hard failure (§7 propagation policy).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Cancelled)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream(e) => write!(f, "upstream {} failed: {}", e.upstream, e.msg),
            Self::Validation(e) => write!(f, "dnssec validation of {} failed: {}", e.fqdn, e.msg),
            Self::Config(e) => write!(f, "invalid configuration for {}: {}", e.field, e.msg),
            Self::Operational(e) => write!(f, "{} failed: {}", e.operation, e.msg),
            Self::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<hickory_proto::ProtoError> for CoreError {
    fn from(value: hickory_proto::ProtoError) -> Self {
        CoreError::upstream("wire", value.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(value: std::io::Error) -> Self {
        CoreError::upstream("io", value.to_string())
    }
}

impl From<hickory_resolver::ResolveError> for CoreError {
    fn from(value: hickory_resolver::ResolveError) -> Self {
        CoreError::upstream("resolve", value.to_string())
    }
}
