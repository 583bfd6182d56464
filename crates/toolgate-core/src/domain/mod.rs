//! Domain types shared by the registry, the enforcer and the invoker.
//!
//! Domain Packs and Tenant Policy Packs are produced by external loaders;
//! this crate only consumes them.

pub mod error;
pub mod pack;
pub mod tenant;
pub mod version;

pub use error::{RegistryError, Result};
pub use pack::{
    CustomGuardrails, DomainPack, Guardrails, TenantPolicyPack, ToolDefinition, ToolOverride,
};
pub use tenant::TenantId;
pub use version::{is_compatible, major_version};
