//! Toolgate core: tool governance for autonomous agents.
//!
//! - [`registry::ToolRegistry`]: tenant-scoped tool catalog built from
//!   Domain Packs and tenant policy packs
//! - [`enforcer::AllowListEnforcer`]: allow/block decisions
//! - [`conditions::evaluate`]: playbook condition matching
//! - [`sandbox::SandboxedInvoker`]: dry-run or guarded live tool calls
//! - [`safety`]: secret redaction and outbound URL validation

pub mod conditions;
pub mod config;
pub mod domain;
pub mod enforcer;
pub mod obs;
pub mod registry;
pub mod safety;
pub mod sandbox;
pub mod telemetry;

pub use conditions::{
    evaluate as evaluate_conditions, rank_playbooks, ConditionMatch, ExceptionAttributes,
    RankedCandidate,
};
pub use config::{ConfigError, GovernanceConfig, RegistryConfig};
pub use domain::{
    is_compatible, major_version, CustomGuardrails, DomainPack, Guardrails, RegistryError,
    TenantId, TenantPolicyPack, ToolDefinition, ToolOverride,
};
pub use enforcer::{AllowListEnforcer, DenyReason, EnforcerVerdict};
pub use registry::{
    AccessDecision, CatalogEntry, EnforcementState, ToolNaming, ToolRegistry, UnconfiguredPolicy,
};
pub use safety::{redact, redact_text, scrub, validate_url, UrlPolicy, UrlValidationError};
pub use sandbox::{
    AuditLogger, AuditOutcome, AuditRecord, BreakerConfig, BreakerState, CircuitBreakerRegistry,
    DisabledTools, ExecutionConfig, HttpTransport, InMemoryAuditLogger, InvocationError,
    InvocationErrorKind, InvocationMode, InvocationOutcome, SandboxedInvoker,
    StaticDisabledTools, ToolCall, ToolTransport, TracingAuditLogger, TransportError,
    TransportResponse,
};
pub use telemetry::init_tracing;
