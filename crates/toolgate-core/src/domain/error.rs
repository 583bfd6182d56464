//! Catalog / allow-list integrity errors.
//!
//! Every variant is caller-fixable and is never retried.

use super::tenant::TenantId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{tool}' is not defined in the domain pack for tenant '{tenant}'")]
    NotInDomainPack { tenant: TenantId, tool: String },

    #[error("tool '{tool}' is not registered for tenant '{tenant}'")]
    NotRegistered { tenant: TenantId, tool: String },

    #[error("tool '{tool}' is not in the allow-list for tenant '{tenant}': {reason}")]
    NotInAllowList {
        tenant: TenantId,
        tool: String,
        reason: String,
    },

    #[error("incompatible version for tool '{tool}': '{existing}' -> '{incoming}'")]
    IncompatibleVersion {
        tool: String,
        existing: String,
        incoming: String,
    },

    #[error("endpoint for tool '{tool}' must match the domain pack endpoint")]
    EndpointMismatch { tool: String },

    #[error("tool override references unknown tool '{tool}' in domain '{domain}' for tenant '{tenant}'")]
    UnknownOverride {
        tenant: TenantId,
        domain: String,
        tool: String,
    },

    #[error("policy pack belongs to tenant '{found}', not '{expected}'")]
    TenantMismatch { expected: TenantId, found: TenantId },

    #[error("domain '{domain}' is not registered for tenant '{tenant}'")]
    UnknownDomain { tenant: TenantId, domain: String },
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
