//! Tenant-scoped tool catalog.
//!
//! Entries are keyed by `(tenant, domain, tool)`. Canonical definitions come
//! from Domain Packs; tenants may adjust timeout/retries through their policy
//! pack, and the admin path may adjust description, parameters, version,
//! timeout and retries. The endpoint is always the canonical one.
//!
//! Registration takes the write lock for the whole operation and validates
//! before mutating, so a rejected pack leaves the catalog untouched and
//! readers never see a half-applied pack.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::{
    is_compatible, DomainPack, RegistryError, Result, TenantId, TenantPolicyPack, ToolDefinition,
    ToolOverride,
};
use crate::enforcer::{AllowListEnforcer, DenyReason, EnforcerVerdict};
use crate::obs;

type CatalogKey = (TenantId, String, String);

fn key(tenant: &TenantId, domain: &str, tool: &str) -> CatalogKey {
    (tenant.clone(), domain.to_string(), tool.to_string())
}

/// What to do for a tenant that has no policy pack registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnconfiguredPolicy {
    /// Fail open: registered tools are allowed (logged at warn).
    #[default]
    Allow,
    /// Fail closed.
    Deny,
}

/// Whether a tenant's decision came from a policy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementState {
    NotConfigured,
    Enforced,
}

/// Result of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed { state: EnforcementState },
    NotRegistered,
    Denied { reason: DenyReason },
    /// No policy pack and the registry fails closed.
    Unconfigured,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed { .. })
    }
}

/// How `list_tools` renders names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolNaming {
    Bare,
    /// `"<domain>:<tool>"`
    Namespaced,
}

/// A resolved catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub tenant_id: TenantId,
    pub domain_name: String,
    pub tool_name: String,
    /// Canonical definition merged with tenant/admin overrides.
    pub definition: ToolDefinition,
    /// Definition as shipped in the Domain Pack.
    pub canonical: ToolDefinition,
}

impl CatalogEntry {
    pub fn namespaced_name(&self) -> String {
        format!("{}:{}", self.domain_name, self.tool_name)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    canonical: HashMap<CatalogKey, ToolDefinition>,
    resolved: HashMap<CatalogKey, ToolDefinition>,
    domains: HashMap<TenantId, BTreeSet<String>>,
    enforcers: HashMap<TenantId, Arc<AllowListEnforcer>>,
    policy_overrides: HashMap<CatalogKey, ToolOverride>,
    admin_overrides: HashMap<CatalogKey, ToolDefinition>,
}

impl RegistryState {
    fn resolve(&mut self, key: &CatalogKey) {
        let Some(canonical) = self.canonical.get(key) else {
            return;
        };
        let mut definition = match self.admin_overrides.get(key) {
            Some(admin) => ToolDefinition {
                endpoint: canonical.endpoint.clone(),
                ..admin.clone()
            },
            None => canonical.clone(),
        };
        if let Some(o) = self.policy_overrides.get(key) {
            if let Some(timeout_ms) = o.timeout_ms {
                definition.timeout_ms = timeout_ms;
            }
            if let Some(max_retries) = o.max_retries {
                definition.max_retries = max_retries;
            }
        }
        self.resolved.insert(key.clone(), definition);
    }

    /// Locate the key for `tool`, searching the tenant's domains in sorted
    /// order when `domain` is omitted.
    fn find_key(&self, tenant: &TenantId, tool: &str, domain: Option<&str>) -> Option<CatalogKey> {
        match domain {
            Some(domain) => {
                let k = key(tenant, domain, tool);
                self.canonical.contains_key(&k).then_some(k)
            }
            None => self.domains.get(tenant)?.iter().find_map(|domain| {
                let k = key(tenant, domain, tool);
                self.canonical.contains_key(&k).then_some(k)
            }),
        }
    }

    fn entry(&self, k: &CatalogKey) -> Option<CatalogEntry> {
        Some(CatalogEntry {
            tenant_id: k.0.clone(),
            domain_name: k.1.clone(),
            tool_name: k.2.clone(),
            definition: self.resolved.get(k)?.clone(),
            canonical: self.canonical.get(k)?.clone(),
        })
    }
}

/// Namespaced, multi-tenant tool catalog.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    unconfigured: UnconfiguredPolicy,
}

impl ToolRegistry {
    /// Empty registry that fails open for unconfigured tenants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose how tenants without a policy pack are treated.
    pub fn with_unconfigured_policy(mut self, policy: UnconfiguredPolicy) -> Self {
        self.unconfigured = policy;
        self
    }

    /// Load or merge a Domain Pack for `tenant`. Returns the number of tools.
    ///
    /// Rejects the whole pack if any tool changes major version relative
    /// to its existing entry. Re-registering an unchanged pack is a no-op.
    pub fn register_domain_pack(&self, tenant: &TenantId, pack: &DomainPack) -> Result<usize> {
        let mut state = self.state.write();

        for (name, incoming) in &pack.tools {
            let k = key(tenant, &pack.domain_name, name);
            if let Some(existing) = state.resolved.get(&k) {
                if !is_compatible(&existing.version, &incoming.version) {
                    return Err(RegistryError::IncompatibleVersion {
                        tool: name.clone(),
                        existing: existing.version.clone(),
                        incoming: incoming.version.clone(),
                    });
                }
            }
        }

        for (name, definition) in &pack.tools {
            let k = key(tenant, &pack.domain_name, name);
            state.canonical.insert(k.clone(), definition.clone());
            state.resolve(&k);
        }
        state
            .domains
            .entry(tenant.clone())
            .or_default()
            .insert(pack.domain_name.clone());

        obs::emit_domain_pack_registered(tenant, &pack.domain_name, pack.tools.len());
        Ok(pack.tools.len())
    }

    /// Install a tenant's policy pack: validates overrides, records them and
    /// replaces the tenant's enforcer.
    pub fn register_policy_pack(
        &self,
        tenant: &TenantId,
        policy: &TenantPolicyPack,
    ) -> Result<Arc<AllowListEnforcer>> {
        if &policy.tenant_id != tenant {
            return Err(RegistryError::TenantMismatch {
                expected: tenant.clone(),
                found: policy.tenant_id.clone(),
            });
        }

        let mut state = self.state.write();
        let domain = policy.domain_name.as_str();
        let domain_known = state
            .domains
            .get(tenant)
            .is_some_and(|domains| domains.contains(domain));
        if !domain_known {
            return Err(RegistryError::UnknownDomain {
                tenant: tenant.clone(),
                domain: domain.to_string(),
            });
        }

        for o in &policy.tool_overrides {
            if !state.canonical.contains_key(&key(tenant, domain, &o.tool_name)) {
                return Err(RegistryError::UnknownOverride {
                    tenant: tenant.clone(),
                    domain: domain.to_string(),
                    tool: o.tool_name.clone(),
                });
            }
        }

        let stale: Vec<CatalogKey> = state
            .policy_overrides
            .keys()
            .filter(|k| &k.0 == tenant && k.1 == domain)
            .cloned()
            .collect();
        for k in &stale {
            state.policy_overrides.remove(k);
        }
        for o in &policy.tool_overrides {
            state
                .policy_overrides
                .insert(key(tenant, domain, &o.tool_name), o.clone());
        }
        let touched: Vec<CatalogKey> = state
            .canonical
            .keys()
            .filter(|k| &k.0 == tenant && k.1 == domain)
            .cloned()
            .collect();
        for k in &touched {
            state.resolve(k);
        }

        let enforcer = Arc::new(AllowListEnforcer::from_policy(policy));
        state.enforcers.insert(tenant.clone(), Arc::clone(&enforcer));

        obs::emit_policy_pack_registered(
            tenant,
            domain,
            policy.tool_overrides.len(),
            enforcer.snapshot_digest(),
        );
        Ok(enforcer)
    }

    /// Admin registration path. The tool must already exist in a Domain
    /// Pack, the endpoint must be the canonical one and the version must be
    /// compatible with the canonical version.
    pub fn register(
        &self,
        tenant: &TenantId,
        name: &str,
        definition: ToolDefinition,
        domain: Option<&str>,
    ) -> Result<CatalogEntry> {
        let mut state = self.state.write();
        let k = state
            .find_key(tenant, name, domain)
            .ok_or_else(|| RegistryError::NotInDomainPack {
                tenant: tenant.clone(),
                tool: name.to_string(),
            })?;

        let Some(canonical) = state.canonical.get(&k) else {
            return Err(RegistryError::NotInDomainPack {
                tenant: tenant.clone(),
                tool: name.to_string(),
            });
        };
        if definition.endpoint != canonical.endpoint {
            return Err(RegistryError::EndpointMismatch {
                tool: name.to_string(),
            });
        }
        if !is_compatible(&canonical.version, &definition.version) {
            return Err(RegistryError::IncompatibleVersion {
                tool: name.to_string(),
                existing: canonical.version.clone(),
                incoming: definition.version,
            });
        }

        state.admin_overrides.insert(k.clone(), definition);
        state.resolve(&k);
        state.entry(&k).ok_or_else(|| RegistryError::NotRegistered {
            tenant: tenant.clone(),
            tool: name.to_string(),
        })
    }

    /// Resolved entry for `name`, with overrides applied.
    ///
    /// Without `domain`, the tenant's domains are searched in sorted order and the
    /// first match wins.
    pub fn get(&self, tenant: &TenantId, name: &str, domain: Option<&str>) -> Option<CatalogEntry> {
        let state = self.state.read();
        let k = state.find_key(tenant, name, domain)?;
        state.entry(&k)
    }

    /// Domains registered for `tenant`, sorted.
    pub fn domains(&self, tenant: &TenantId) -> Vec<String> {
        let state = self.state.read();
        state
            .domains
            .get(tenant)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The enforcer built from the tenant's current policy pack, if any.
    pub fn get_enforcer(&self, tenant: &TenantId) -> Option<Arc<AllowListEnforcer>> {
        self.state.read().enforcers.get(tenant).cloned()
    }

    /// Every registered tool for `tenant`, sorted, regardless of access.
    pub fn list_tools(
        &self,
        tenant: &TenantId,
        domain: Option<&str>,
        naming: ToolNaming,
    ) -> Vec<String> {
        self.collect_tools(tenant, domain, naming, false)
    }

    /// Registered tools that `access_decision` currently allows.
    ///
    /// ```ignore
    /// let tools = registry.list_allowed_tools(&tenant, Some("Finance"), ToolNaming::Namespaced);
    /// assert_eq!(tools, vec!["Finance:refund"]);
    /// ```
    pub fn list_allowed_tools(
        &self,
        tenant: &TenantId,
        domain: Option<&str>,
        naming: ToolNaming,
    ) -> Vec<String> {
        self.collect_tools(tenant, domain, naming, true)
    }

    fn collect_tools(
        &self,
        tenant: &TenantId,
        domain: Option<&str>,
        naming: ToolNaming,
        allowed_only: bool,
    ) -> Vec<String> {
        let state = self.state.read();
        let enforcer = state.enforcers.get(tenant);
        let mut keys: Vec<&CatalogKey> = state
            .canonical
            .keys()
            .filter(|k| &k.0 == tenant && domain.map_or(true, |d| k.1 == d))
            .filter(|k| !allowed_only || self.decide(enforcer, tenant, &k.2).is_allowed())
            .collect();
        keys.sort_by(|a, b| (&a.1, &a.2).cmp(&(&b.1, &b.2)));
        keys.into_iter()
            .map(|k| match naming {
                ToolNaming::Bare => k.2.clone(),
                ToolNaming::Namespaced => format!("{}:{}", k.1, k.2),
            })
            .collect()
    }

    /// Tagged access decision for `name`.
    pub fn access_decision(&self, tenant: &TenantId, name: &str) -> AccessDecision {
        let state = self.state.read();
        if state.find_key(tenant, name, None).is_none() {
            return AccessDecision::NotRegistered;
        }
        self.decide(state.enforcers.get(tenant), tenant, name)
    }

    fn decide(
        &self,
        enforcer: Option<&Arc<AllowListEnforcer>>,
        tenant: &TenantId,
        name: &str,
    ) -> AccessDecision {
        match enforcer {
            Some(enforcer) => match enforcer.check(name) {
                EnforcerVerdict::Allowed => AccessDecision::Allowed {
                    state: EnforcementState::Enforced,
                },
                EnforcerVerdict::Denied { reason } => AccessDecision::Denied { reason },
            },
            None => match self.unconfigured {
                UnconfiguredPolicy::Allow => {
                    obs::emit_unconfigured_access(tenant, name);
                    AccessDecision::Allowed {
                        state: EnforcementState::NotConfigured,
                    }
                }
                UnconfiguredPolicy::Deny => AccessDecision::Unconfigured,
            },
        }
    }

    /// Registered AND passes the tenant's enforcer.
    pub fn is_allowed(&self, tenant: &TenantId, name: &str) -> bool {
        self.access_decision(tenant, name).is_allowed()
    }

    /// Guard call at the invocation boundary.
    pub fn validate_tool_access(&self, tenant: &TenantId, name: &str) -> Result<()> {
        match self.access_decision(tenant, name) {
            AccessDecision::Allowed { .. } => Ok(()),
            AccessDecision::NotRegistered => Err(RegistryError::NotRegistered {
                tenant: tenant.clone(),
                tool: name.to_string(),
            }),
            AccessDecision::Denied { reason } => Err(RegistryError::NotInAllowList {
                tenant: tenant.clone(),
                tool: name.to_string(),
                reason: reason.to_string(),
            }),
            AccessDecision::Unconfigured => Err(RegistryError::NotInAllowList {
                tenant: tenant.clone(),
                tool: name.to_string(),
                reason: "no policy pack registered".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CustomGuardrails;

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn finance_pack(version: &str) -> DomainPack {
        DomainPack::new("Finance")
            .with_tool(
                "refund",
                ToolDefinition::new("https://api.example.com/refund", version)
                    .with_description("Issue a refund"),
            )
            .with_tool(
                "notify",
                ToolDefinition::new("https://api.example.com/notify", version),
            )
    }

    fn registry() -> ToolRegistry {
        let reg = ToolRegistry::new();
        reg.register_domain_pack(&tenant(), &finance_pack("1.0.0"))
            .unwrap();
        reg
    }

    #[test]
    fn test_register_and_get() {
        let reg = registry();
        let entry = reg.get(&tenant(), "refund", None).unwrap();
        assert_eq!(entry.domain_name, "Finance");
        assert_eq!(entry.namespaced_name(), "Finance:refund");
        assert!(reg.get(&tenant(), "refund", Some("Retail")).is_none());
        assert!(reg.get(&TenantId::new("other"), "refund", None).is_none());
    }

    #[test]
    fn test_incompatible_major_rejected_atomically() {
        let reg = registry();
        let pack = finance_pack("2.0.0").with_tool(
            "escalate",
            ToolDefinition::new("https://api.example.com/escalate", "1.0.0"),
        );
        let err = reg.register_domain_pack(&tenant(), &pack).unwrap_err();
        assert!(matches!(err, RegistryError::IncompatibleVersion { .. }));
        assert!(reg.get(&tenant(), "escalate", None).is_none());
        assert_eq!(reg.get(&tenant(), "refund", None).unwrap().definition.version, "1.0.0");
    }

    #[test]
    fn test_compatible_minor_update_accepted() {
        let reg = registry();
        reg.register_domain_pack(&tenant(), &finance_pack("1.4.0"))
            .unwrap();
        assert_eq!(reg.get(&tenant(), "refund", None).unwrap().definition.version, "1.4.0");
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let reg = registry();
        let before = reg.get(&tenant(), "refund", None).unwrap();
        let tools_before = reg.list_tools(&tenant(), None, ToolNaming::Namespaced);
        reg.register_domain_pack(&tenant(), &finance_pack("1.0.0"))
            .unwrap();
        assert_eq!(reg.get(&tenant(), "refund", None).unwrap(), before);
        assert_eq!(reg.list_tools(&tenant(), None, ToolNaming::Namespaced), tools_before);
    }

    #[test]
    fn test_policy_override_unknown_tool_fails_fast() {
        let reg = registry();
        let policy = TenantPolicyPack::new("acme", "Finance").with_override(ToolOverride {
            tool_name: "wire".into(),
            timeout_ms: Some(10),
            max_retries: None,
        });
        let err = reg.register_policy_pack(&tenant(), &policy).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownOverride { .. }));
        assert!(reg.get_enforcer(&tenant()).is_none());
    }

    #[test]
    fn test_policy_override_merges_timeout_and_retries() {
        let reg = registry();
        let policy = TenantPolicyPack::new("acme", "Finance")
            .approve(["refund"])
            .with_override(ToolOverride {
                tool_name: "refund".into(),
                timeout_ms: Some(1_500),
                max_retries: Some(0),
            });
        reg.register_policy_pack(&tenant(), &policy).unwrap();

        let entry = reg.get(&tenant(), "refund", None).unwrap();
        assert_eq!(entry.definition.timeout_ms, 1_500);
        assert_eq!(entry.definition.max_retries, 0);
        assert_eq!(entry.canonical.timeout_ms, 30_000);

        // Survives a compatible domain pack refresh.
        reg.register_domain_pack(&tenant(), &finance_pack("1.1.0"))
            .unwrap();
        assert_eq!(reg.get(&tenant(), "refund", None).unwrap().definition.timeout_ms, 1_500);
    }

    #[test]
    fn test_policy_tenant_mismatch_rejected() {
        let reg = registry();
        let policy = TenantPolicyPack::new("globex", "Finance");
        assert!(matches!(
            reg.register_policy_pack(&tenant(), &policy),
            Err(RegistryError::TenantMismatch { .. })
        ));
    }

    #[test]
    fn test_admin_register_requires_domain_pack_tool() {
        let reg = registry();
        let err = reg
            .register(
                &tenant(),
                "wire",
                ToolDefinition::new("https://api.example.com/wire", "1.0.0"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotInDomainPack { .. }));
    }

    #[test]
    fn test_admin_register_cannot_change_endpoint() {
        let reg = registry();
        let err = reg
            .register(
                &tenant(),
                "refund",
                ToolDefinition::new("https://attacker.example.net/refund", "1.0.0"),
                None,
            )
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::EndpointMismatch {
                tool: "refund".into()
            }
        );
    }

    #[test]
    fn test_admin_register_merges_fields() {
        let reg = registry();
        let entry = reg
            .register(
                &tenant(),
                "refund",
                ToolDefinition::new("https://api.example.com/refund", "1.3.0")
                    .with_description("Refund v1.3")
                    .with_timeout_ms(900),
                Some("Finance"),
            )
            .unwrap();
        assert_eq!(entry.definition.description, "Refund v1.3");
        assert_eq!(entry.definition.version, "1.3.0");
        assert_eq!(entry.definition.timeout_ms, 900);

        let err = reg
            .register(
                &tenant(),
                "refund",
                ToolDefinition::new("https://api.example.com/refund", "2.0.0"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::IncompatibleVersion { .. }));
    }

    #[test]
    fn test_access_without_policy_follows_unconfigured_policy() {
        let reg = registry();
        assert_eq!(
            reg.access_decision(&tenant(), "refund"),
            AccessDecision::Allowed {
                state: EnforcementState::NotConfigured
            }
        );

        let strict = ToolRegistry::new().with_unconfigured_policy(UnconfiguredPolicy::Deny);
        strict
            .register_domain_pack(&tenant(), &finance_pack("1.0.0"))
            .unwrap();
        assert!(!strict.is_allowed(&tenant(), "refund"));
        assert!(matches!(
            strict.validate_tool_access(&tenant(), "refund"),
            Err(RegistryError::NotInAllowList { .. })
        ));
    }

    #[test]
    fn test_validate_tool_access_reasons() {
        let reg = registry();
        let policy = TenantPolicyPack::new("acme", "Finance")
            .approve(["refund", "notify"])
            .with_guardrails(CustomGuardrails {
                allow_lists: vec![],
                block_lists: vec!["notify".into()],
            });
        reg.register_policy_pack(&tenant(), &policy).unwrap();

        assert!(reg.validate_tool_access(&tenant(), "refund").is_ok());
        assert!(matches!(
            reg.validate_tool_access(&tenant(), "wire"),
            Err(RegistryError::NotRegistered { .. })
        ));
        match reg.validate_tool_access(&tenant(), "notify") {
            Err(RegistryError::NotInAllowList { reason, .. }) => {
                assert!(reason.contains("block-list"));
            }
            other => panic!("expected NotInAllowList, got {other:?}"),
        }
    }

    #[test]
    fn test_list_tools_and_allowed_tools() {
        let reg = registry();
        reg.register_domain_pack(
            &tenant(),
            &DomainPack::new("Claims").with_tool(
                "refund",
                ToolDefinition::new("https://claims.example.com/refund", "3.0.0"),
            ),
        )
        .unwrap();

        assert_eq!(
            reg.list_tools(&tenant(), None, ToolNaming::Namespaced),
            vec!["Claims:refund", "Finance:notify", "Finance:refund"]
        );
        assert_eq!(
            reg.list_tools(&tenant(), Some("Finance"), ToolNaming::Bare),
            vec!["notify", "refund"]
        );

        reg.register_policy_pack(
            &tenant(),
            &TenantPolicyPack::new("acme", "Finance").approve(["refund"]),
        )
        .unwrap();
        assert_eq!(
            reg.list_allowed_tools(&tenant(), Some("Finance"), ToolNaming::Bare),
            vec!["refund"]
        );
        // Omitted domain resolves to the first domain in sorted order.
        assert_eq!(reg.get(&tenant(), "refund", None).unwrap().domain_name, "Claims");
    }

    #[test]
    fn test_same_tool_name_isolated_across_tenants() {
        let reg = registry();
        let globex = TenantId::new("globex");
        reg.register_domain_pack(&globex, &finance_pack("5.0.0"))
            .unwrap();
        reg.register_policy_pack(
            &globex,
            &TenantPolicyPack::new("globex", "Finance").approve(["notify"]),
        )
        .unwrap();

        assert_eq!(reg.get(&tenant(), "refund", None).unwrap().definition.version, "1.0.0");
        assert_eq!(reg.get(&globex, "refund", None).unwrap().definition.version, "5.0.0");
        assert!(!reg.is_allowed(&globex, "refund"));
        assert!(reg.is_allowed(&tenant(), "refund"));
    }
}
