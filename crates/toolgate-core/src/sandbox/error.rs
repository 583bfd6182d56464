//! Error types for the sandboxed invoker.

use serde::Serialize;

use crate::domain::{RegistryError, TenantId};
use crate::safety::UrlValidationError;

/// Errors produced by [`SandboxedInvoker::invoke`](super::SandboxedInvoker::invoke).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("tenant policy belongs to '{found}', call is for '{expected}'")]
    TenantMismatch { expected: TenantId, found: TenantId },

    #[error("tool '{tool}' is not allowed: {reason}")]
    NotAllowed { tool: String, reason: String },

    #[error("tool '{tool}' is disabled for tenant '{tenant}'")]
    ToolDisabled { tenant: TenantId, tool: String },

    #[error("tool '{tool}' failed after {attempts} attempt(s): {reason}")]
    Transport {
        tool: String,
        attempts: u32,
        status: Option<u16>,
        reason: String,
    },

    #[error("tool '{tool}' timed out after {timeout_ms}ms ({attempts} attempt(s))")]
    Timeout {
        tool: String,
        timeout_ms: u64,
        attempts: u32,
    },

    #[error("circuit breaker open for tool '{tool}' ({failures} consecutive failures)")]
    CircuitOpen { tool: String, failures: u32 },

    #[error("endpoint rejected: {0}")]
    UrlRejected(#[from] UrlValidationError),
}

/// Coarse classification for callers and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    Registry,
    Invocation,
    Timeout,
    CircuitOpen,
    UrlValidation,
}

impl InvocationError {
    pub fn kind(&self) -> InvocationErrorKind {
        match self {
            InvocationError::Registry(_) => InvocationErrorKind::Registry,
            InvocationError::TenantMismatch { .. }
            | InvocationError::NotAllowed { .. }
            | InvocationError::ToolDisabled { .. }
            | InvocationError::Transport { .. } => InvocationErrorKind::Invocation,
            InvocationError::Timeout { .. } => InvocationErrorKind::Timeout,
            InvocationError::CircuitOpen { .. } => InvocationErrorKind::CircuitOpen,
            InvocationError::UrlRejected(_) => InvocationErrorKind::UrlValidation,
        }
    }
}

pub type InvocationResult<T> = std::result::Result<T, InvocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let registry = InvocationError::from(RegistryError::EndpointMismatch {
            tool: "refund".into(),
        });
        assert_eq!(registry.kind(), InvocationErrorKind::Registry);

        let url = InvocationError::from(UrlValidationError::MissingHost);
        assert_eq!(url.kind(), InvocationErrorKind::UrlValidation);

        let open = InvocationError::CircuitOpen {
            tool: "refund".into(),
            failures: 5,
        };
        assert_eq!(open.kind(), InvocationErrorKind::CircuitOpen);
        assert!(open.to_string().contains("5 consecutive failures"));
    }
}
