//! Guarded tool execution: validation chain, dry-run, live calls with
//! timeout/retry/backoff, per-(tenant, tool) circuit breakers and audit.

pub mod audit;
pub mod breaker;
pub mod disabled;
pub mod error;
pub mod execution;
pub mod invoker;
pub mod transport;

pub use audit::{
    AuditLogger, AuditOutcome, AuditRecord, InMemoryAuditLogger, LoggedEvent, TracingAuditLogger,
    INVOCATION_EVENT,
};
pub use breaker::{BreakerConfig, BreakerPermit, BreakerRejected, BreakerState, CircuitBreakerRegistry};
pub use disabled::{DisabledTools, StaticDisabledTools};
pub use error::{InvocationError, InvocationErrorKind, InvocationResult};
pub use execution::ExecutionConfig;
pub use invoker::{InvocationMode, InvocationOutcome, SandboxedInvoker, ToolCall};
pub use transport::{HttpTransport, ToolTransport, TransportError, TransportResponse};
