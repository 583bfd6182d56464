//! The sandboxed invoker: `VALIDATE -> (DRY_RUN | EXECUTE) -> AUDIT`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{warn, Instrument};
use url::Url;

use super::audit::{AuditLogger, AuditOutcome, AuditRecord, TracingAuditLogger, INVOCATION_EVENT};
use super::breaker::{BreakerState, CircuitBreakerRegistry};
use super::disabled::{DisabledTools, StaticDisabledTools};
use super::error::{InvocationError, InvocationResult};
use super::execution::ExecutionConfig;
use super::transport::{HttpTransport, ToolTransport, TransportError};
use crate::config::GovernanceConfig;
use crate::domain::{DomainPack, RegistryError, TenantId, TenantPolicyPack, ToolDefinition};
use crate::enforcer::{AllowListEnforcer, EnforcerVerdict};
use crate::obs::{self, InvocationSpan};
use crate::registry::ToolRegistry;
use crate::safety::{redact_text, scrub, validate_url, UrlPolicy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// No I/O; returns a mock result.
    #[default]
    DryRun,
    Live,
}

/// One request to run a tool on behalf of a tenant.
#[derive(Debug, Clone)]
pub struct ToolCall<'a> {
    pub tenant_id: TenantId,
    pub tool_name: String,
    pub args: Value,
    pub tenant_policy: &'a TenantPolicyPack,
    pub domain_pack: &'a DomainPack,
    pub mode: InvocationMode,
}

impl<'a> ToolCall<'a> {
    /// A dry-run call.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        tool_name: impl Into<String>,
        args: Value,
        tenant_policy: &'a TenantPolicyPack,
        domain_pack: &'a DomainPack,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tool_name: tool_name.into(),
            args,
            tenant_policy,
            domain_pack,
            mode: InvocationMode::DryRun,
        }
    }

    pub fn live(mut self) -> Self {
        self.mode = InvocationMode::Live;
        self
    }

    pub fn with_mode(mut self, mode: InvocationMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationOutcome {
    pub tool_name: String,
    pub dry_run: bool,
    pub output: Value,
    /// Attempts made; 0 for a dry-run.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: u64,
}

/// State carried from validation into execution.
struct Validated {
    domain_name: String,
    definition: ToolDefinition,
    policy_digest: String,
}

pub struct SandboxedInvoker<T: ToolTransport = HttpTransport> {
    registry: Arc<ToolRegistry>,
    transport: T,
    breakers: CircuitBreakerRegistry,
    audit: Arc<dyn AuditLogger>,
    disabled: Arc<dyn DisabledTools>,
    execution: ExecutionConfig,
    url_policy: UrlPolicy,
}

impl SandboxedInvoker<HttpTransport> {
    /// Invoker backed by the reqwest transport.
    pub fn new(registry: Arc<ToolRegistry>, config: &GovernanceConfig) -> Self {
        let transport = HttpTransport::new(config.execution.user_agent.clone());
        Self::with_transport(registry, transport, config)
    }
}

impl<T: ToolTransport> SandboxedInvoker<T> {
    /// Invoker over a custom transport. Audit goes to tracing until replaced.
    pub fn with_transport(registry: Arc<ToolRegistry>, transport: T, config: &GovernanceConfig) -> Self {
        Self {
            registry,
            transport,
            breakers: CircuitBreakerRegistry::new(config.breaker.clone()),
            audit: Arc::new(TracingAuditLogger),
            disabled: Arc::new(StaticDisabledTools::new()),
            execution: config.execution.clone(),
            url_policy: config.url_policy.clone(),
        }
    }

    /// Replace the audit sink.
    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Replace the operator kill switch.
    pub fn with_disabled_tools(mut self, disabled: Arc<dyn DisabledTools>) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Circuit breakers, keyed by (tenant, tool).
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the transport's pooled resources. Idempotent.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Validate and run one tool call.
    ///
    /// Validation (tenant, allow-list, registry, kill switch, breaker) always runs
    /// and rejects without I/O. A dry-run returns a simulated output. A live call
    /// checks the endpoint URL, then posts with per-attempt timeout, retries and
    /// backoff, emitting one audit record per attempt. Dropping the future
    /// cancels the in-flight attempt and schedules no retry.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let call = ToolCall::new("acme", "refund", json!({"order": 7}), &policy, &pack).live();
    /// let outcome = invoker.invoke(call).await?;
    /// ```
    pub async fn invoke(&self, call: ToolCall<'_>) -> InvocationResult<InvocationOutcome> {
        let span = InvocationSpan::new(&call.tenant_id, &call.tool_name);
        self.run(call).instrument(span.span()).await
    }

    async fn run(&self, call: ToolCall<'_>) -> InvocationResult<InvocationOutcome> {
        let started = Instant::now();
        obs::emit_invoke_started(&call.tenant_id, &call.tool_name, call.mode);

        let validated = match self.validate(&call) {
            Ok(v) => v,
            Err(err) => {
                self.reject(&call, None, &err);
                return Err(err);
            }
        };

        match call.mode {
            InvocationMode::DryRun => Ok(self.dry_run(&call, &validated, started)),
            InvocationMode::Live => self.execute(&call, &validated, started).await,
        }
    }

    fn validate(&self, call: &ToolCall<'_>) -> InvocationResult<Validated> {
        let tenant = &call.tenant_id;
        let tool = call.tool_name.as_str();

        if &call.tenant_policy.tenant_id != tenant {
            return Err(InvocationError::TenantMismatch {
                expected: tenant.clone(),
                found: call.tenant_policy.tenant_id.clone(),
            });
        }

        let pack_definition =
            call.domain_pack
                .tool(tool)
                .ok_or_else(|| RegistryError::NotInDomainPack {
                    tenant: tenant.clone(),
                    tool: tool.to_string(),
                })?;

        let enforcer = AllowListEnforcer::from_policy(call.tenant_policy);
        if let EnforcerVerdict::Denied { reason } = enforcer.check(tool) {
            return Err(InvocationError::NotAllowed {
                tool: tool.to_string(),
                reason: reason.to_string(),
            });
        }

        self.registry.validate_tool_access(tenant, tool)?;

        if self.disabled.is_disabled(tenant, tool) {
            return Err(InvocationError::ToolDisabled {
                tenant: tenant.clone(),
                tool: tool.to_string(),
            });
        }

        if self.breakers.is_open(tenant, tool) {
            return Err(InvocationError::CircuitOpen {
                tool: tool.to_string(),
                failures: self.failures(tenant, tool),
            });
        }

        let definition = self
            .registry
            .get(tenant, tool, Some(&call.domain_pack.domain_name))
            .map(|entry| entry.definition)
            .unwrap_or_else(|| pack_definition.clone());

        Ok(Validated {
            domain_name: call.domain_pack.domain_name.clone(),
            definition,
            policy_digest: enforcer.snapshot_digest().to_string(),
        })
    }

    fn dry_run(&self, call: &ToolCall<'_>, v: &Validated, started: Instant) -> InvocationOutcome {
        let output = json!({
            "dry_run": true,
            "tool": call.tool_name,
            "endpoint": v.definition.endpoint,
            "arguments": call.args,
        });

        let mut record = self.record(call, Some(v), AuditOutcome::Simulated);
        record.dry_run = true;
        record.response = Some(scrub(&output));
        record.duration_ms = elapsed_ms(started);
        self.emit(record);

        obs::emit_invoke_finished(&call.tenant_id, &call.tool_name, 0, elapsed_ms(started), true);
        InvocationOutcome {
            tool_name: call.tool_name.clone(),
            dry_run: true,
            output,
            attempts: 0,
            status_code: None,
            duration_ms: elapsed_ms(started),
        }
    }

    async fn execute(
        &self,
        call: &ToolCall<'_>,
        v: &Validated,
        started: Instant,
    ) -> InvocationResult<InvocationOutcome> {
        let url: Url = match validate_url(&v.definition.endpoint, &self.url_policy) {
            Ok(url) => url,
            Err(err) => {
                let err = InvocationError::from(err);
                self.reject(call, Some(v), &err);
                return Err(err);
            }
        };

        let tenant = &call.tenant_id;
        let tool = call.tool_name.as_str();
        let timeout = Duration::from_millis(v.definition.timeout_ms);
        let max_attempts = v.definition.max_retries.saturating_add(1);
        let mut last_error: Option<InvocationError> = None;

        for attempt in 1..=max_attempts {
            let permit = match self.breakers.acquire(tenant, tool) {
                Ok(permit) => permit,
                Err(rejected) => {
                    let open = InvocationError::CircuitOpen {
                        tool: tool.to_string(),
                        failures: rejected.failures,
                    };
                    return Err(match last_error {
                        Some(err) => {
                            obs::emit_invoke_finished(tenant, tool, attempt - 1, elapsed_ms(started), false);
                            err
                        }
                        None => {
                            self.reject(call, Some(v), &open);
                            open
                        }
                    });
                }
            };

            let attempt_started = Instant::now();
            let result = match tokio::time::timeout(
                timeout,
                self.transport.post(&url, &call.args, timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(TransportError::Timeout {
                    timeout_ms: v.definition.timeout_ms,
                }),
            };

            let mut record = self.record(call, Some(v), AuditOutcome::Success);
            record.attempt = attempt;
            record.duration_ms = elapsed_ms(attempt_started);

            match result {
                Ok(response) => {
                    permit.succeed();
                    record.status_code = Some(response.status);
                    record.response = Some(scrub(&response.body));
                    self.emit(record);

                    let duration_ms = elapsed_ms(started);
                    obs::emit_invoke_finished(tenant, tool, attempt, duration_ms, true);
                    return Ok(InvocationOutcome {
                        tool_name: tool.to_string(),
                        dry_run: false,
                        output: response.body,
                        attempts: attempt,
                        status_code: Some(response.status),
                        duration_ms,
                    });
                }
                Err(transport_err) => {
                    let failures = permit.fail();
                    let error = self.to_invocation_error(tool, attempt, transport_err, &mut record);
                    record.outcome = AuditOutcome::Failure;
                    record.error = Some(redact_text(&error.to_string()));
                    self.emit(record);
                    obs::emit_invoke_attempt_failed(tenant, tool, attempt, failures, &error);

                    last_error = Some(error);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.execution.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        obs::emit_invoke_finished(tenant, tool, max_attempts, elapsed_ms(started), false);
        Err(last_error.unwrap_or_else(|| InvocationError::Transport {
            tool: tool.to_string(),
            attempts: 0,
            status: None,
            reason: "no attempt was made".to_string(),
        }))
    }

    fn to_invocation_error(
        &self,
        tool: &str,
        attempt: u32,
        err: TransportError,
        record: &mut AuditRecord,
    ) -> InvocationError {
        match err {
            TransportError::Timeout { timeout_ms } => InvocationError::Timeout {
                tool: tool.to_string(),
                timeout_ms,
                attempts: attempt,
            },
            TransportError::Status { code, body } => {
                record.status_code = Some(code);
                record.response = Some(scrub(&body));
                InvocationError::Transport {
                    tool: tool.to_string(),
                    attempts: attempt,
                    status: Some(code),
                    reason: format!("endpoint returned status {code}"),
                }
            }
            TransportError::Request(reason) => InvocationError::Transport {
                tool: tool.to_string(),
                attempts: attempt,
                status: None,
                reason: redact_text(&reason),
            },
        }
    }

    fn failures(&self, tenant: &TenantId, tool: &str) -> u32 {
        match self.breakers.state(tenant, tool) {
            BreakerState::Closed { failures }
            | BreakerState::Open { failures, .. }
            | BreakerState::HalfOpen { failures, .. } => failures,
        }
    }

    fn record(&self, call: &ToolCall<'_>, v: Option<&Validated>, outcome: AuditOutcome) -> AuditRecord {
        let mut record = AuditRecord::new(call.tenant_id.clone(), call.tool_name.clone(), outcome);
        record.domain_name = call.domain_pack.domain_name.clone();
        record.dry_run = call.mode == InvocationMode::DryRun;
        record.arguments = scrub(&call.args);
        if let Some(v) = v {
            record.domain_name = v.domain_name.clone();
            record.policy_digest = Some(v.policy_digest.clone());
        }
        record
    }

    fn reject(&self, call: &ToolCall<'_>, v: Option<&Validated>, err: &InvocationError) {
        let mut record = self.record(call, v, AuditOutcome::Rejected);
        record.error = Some(redact_text(&err.to_string()));
        self.emit(record);
        obs::emit_invoke_rejected(&call.tenant_id, &call.tool_name, err);
    }

    fn emit(&self, record: AuditRecord) {
        match serde_json::to_value(&record) {
            Ok(data) => self.audit.log(INVOCATION_EVENT, data, &record.tenant_id),
            Err(err) => warn!(event = "audit.encode_failed", error = %err),
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
