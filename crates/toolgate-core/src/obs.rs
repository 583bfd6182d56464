//! Structured observability hooks for governance and invocation events.
//!
//! Every event carries an `event = "..."` field. Argument payloads are never
//! logged and error text is scrubbed before it reaches a subscriber.

use tracing::{info, warn};

use crate::domain::TenantId;
use crate::safety::redact_text;
use crate::sandbox::{InvocationError, InvocationMode};

/// Invocation-scoped span tagged with tenant and tool.
///
/// ```ignore
/// let span = InvocationSpan::new(&tenant, "refund");
/// let _guard = span.enter();
/// ```
pub struct InvocationSpan {
    span: tracing::Span,
}

impl InvocationSpan {
    /// Create (without entering) the span for one invocation.
    pub fn new(tenant: &TenantId, tool: &str) -> Self {
        Self {
            span: tracing::info_span!("toolgate.invoke", tenant_id = %tenant, tool = %tool),
        }
    }

    /// Enter for synchronous code. Do not hold across `.await`.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// The span, for `Instrument::instrument`.
    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }
}

/// Emit event: invocation started.
///
/// # Example
///
/// ```ignore
/// emit_invoke_started(&tenant, "refund", InvocationMode::DryRun);
/// // logs: event=tool.invoke.started tenant_id=acme tool=refund dry_run=true
/// ```
pub fn emit_invoke_started(tenant: &TenantId, tool: &str, mode: InvocationMode) {
    info!(
        event = "tool.invoke.started",
        tenant_id = %tenant,
        tool = %tool,
        dry_run = mode == InvocationMode::DryRun,
    );
}

/// Emit event: live invocation finished after `attempts` attempts.
pub fn emit_invoke_finished(tenant: &TenantId, tool: &str, attempts: u32, duration_ms: u64, success: bool) {
    info!(
        event = "tool.invoke.finished",
        tenant_id = %tenant,
        tool = %tool,
        attempts = attempts,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: one attempt failed (warning level). Error text is redacted.
pub fn emit_invoke_attempt_failed(
    tenant: &TenantId,
    tool: &str,
    attempt: u32,
    failures: u32,
    error: &InvocationError,
) {
    warn!(
        event = "tool.invoke.attempt_failed",
        tenant_id = %tenant,
        tool = %tool,
        attempt = attempt,
        consecutive_failures = failures,
        error = %redact_text(&error.to_string()),
    );
}

/// Emit event: call rejected before any attempt (warning level).
pub fn emit_invoke_rejected(tenant: &TenantId, tool: &str, error: &InvocationError) {
    warn!(
        event = "tool.invoke.rejected",
        tenant_id = %tenant,
        tool = %tool,
        kind = ?error.kind(),
        error = %redact_text(&error.to_string()),
    );
}

/// Emit event: breaker tripped or re-opened.
pub fn emit_breaker_opened(tenant: &TenantId, tool: &str, failures: u32) {
    warn!(event = "breaker.opened", tenant_id = %tenant, tool = %tool, failures = failures);
}

/// Emit event: cool-down elapsed, one trial admitted.
pub fn emit_breaker_half_open(tenant: &TenantId, tool: &str) {
    info!(event = "breaker.half_open", tenant_id = %tenant, tool = %tool);
}

/// Emit event: trial succeeded, breaker closed.
pub fn emit_breaker_closed(tenant: &TenantId, tool: &str) {
    info!(event = "breaker.closed", tenant_id = %tenant, tool = %tool);
}

/// Emit event: Domain Pack loaded or merged for a tenant.
pub fn emit_domain_pack_registered(tenant: &TenantId, domain: &str, tools: usize) {
    info!(
        event = "registry.domain_pack.registered",
        tenant_id = %tenant,
        domain = %domain,
        tools = tools,
    );
}

/// Emit event: policy pack installed, with its snapshot digest.
pub fn emit_policy_pack_registered(tenant: &TenantId, domain: &str, overrides: usize, digest: &str) {
    info!(
        event = "registry.policy_pack.registered",
        tenant_id = %tenant,
        domain = %domain,
        overrides = overrides,
        digest = %digest,
    );
}

/// No policy pack for the tenant; the registry is failing open.
pub fn emit_unconfigured_access(tenant: &TenantId, tool: &str) {
    warn!(event = "registry.access.not_configured", tenant_id = %tenant, tool = %tool);
}
