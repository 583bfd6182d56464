//! Domain Pack and Tenant Policy Pack inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tenant::TenantId;

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

/// Canonical definition of a side-effecting tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(default)]
    pub description: String,
    /// Endpoint URL the live invocation POSTs to.
    pub endpoint: String,
    /// Parameter schema, opaque to this crate.
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_version")]
    pub version: String,
    /// Per-attempt timeout (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt (0 = run once).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ToolDefinition {
    pub fn new(endpoint: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            endpoint: endpoint.into(),
            parameters: Value::Null,
            version: version.into(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Domain-level guardrails shipped with a Domain Pack.
///
/// Carried through as descriptive metadata. Access decisions come only from
/// the tenant's policy pack (see `AllowListEnforcer`); these lists are not
/// consulted by the registry or the invoker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guardrails {
    #[serde(default)]
    pub allow_lists: Vec<String>,
    #[serde(default)]
    pub block_lists: Vec<String>,
    #[serde(default)]
    pub approval_threshold: f64,
}

/// Canonical, versioned catalog for one business domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainPack {
    pub domain_name: String,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDefinition>,
    #[serde(default)]
    pub guardrails: Guardrails,
}

impl DomainPack {
    pub fn new(domain_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            tools: BTreeMap::new(),
            guardrails: Guardrails::default(),
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, definition: ToolDefinition) -> Self {
        self.tools.insert(name.into(), definition);
        self
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }
}

/// Tenant-level allow/block overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomGuardrails {
    #[serde(default)]
    pub allow_lists: Vec<String>,
    #[serde(default)]
    pub block_lists: Vec<String>,
}

/// Tenant override of a tool's execution limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    pub tool_name: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Tenant-specific overlay restricting a Domain Pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantPolicyPack {
    pub tenant_id: TenantId,
    pub domain_name: String,
    #[serde(default)]
    pub approved_tools: Vec<String>,
    #[serde(default)]
    pub custom_guardrails: Option<CustomGuardrails>,
    #[serde(default)]
    pub tool_overrides: Vec<ToolOverride>,
}

impl TenantPolicyPack {
    pub fn new(tenant_id: impl Into<TenantId>, domain_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            domain_name: domain_name.into(),
            approved_tools: Vec::new(),
            custom_guardrails: None,
            tool_overrides: Vec::new(),
        }
    }

    pub fn approve<const N: usize>(mut self, tools: [&str; N]) -> Self {
        self.approved_tools
            .extend(tools.iter().map(|t| (*t).to_string()));
        self
    }

    pub fn with_guardrails(mut self, guardrails: CustomGuardrails) -> Self {
        self.custom_guardrails = Some(guardrails);
        self
    }

    pub fn with_override(mut self, tool_override: ToolOverride) -> Self {
        self.tool_overrides.push(tool_override);
        self
    }
}
