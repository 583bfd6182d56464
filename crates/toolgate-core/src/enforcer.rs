//! Per-tenant allow/block decisions derived from one policy pack snapshot.
//!
//! A tool is allowed iff it is approved and not blocked. A non-empty
//! custom allow-list replaces the general approved set, and the block-list
//! always wins. The enforcer is immutable; a new policy pack means a new
//! enforcer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{TenantId, TenantPolicyPack};

/// Why a tool was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Blocked,
    NotApproved,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Blocked => write!(f, "tool is on the block-list"),
            DenyReason::NotApproved => write!(f, "tool is not in the approved set"),
        }
    }
}

/// Outcome of checking one tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcerVerdict {
    Allowed,
    Denied { reason: DenyReason },
}

impl EnforcerVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, EnforcerVerdict::Allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListEnforcer {
    tenant_id: TenantId,
    domain_name: String,
    approved: BTreeSet<String>,
    blocked: BTreeSet<String>,
    digest: String,
}

impl AllowListEnforcer {
    /// Build the enforcer for one policy snapshot.
    ///
    /// A non-empty `custom_guardrails.allow_lists` replaces `approved_tools`.
    pub fn from_policy(policy: &TenantPolicyPack) -> Self {
        let custom_allow = policy
            .custom_guardrails
            .as_ref()
            .map(|g| g.allow_lists.as_slice())
            .unwrap_or_default();

        let approved: BTreeSet<String> = if custom_allow.is_empty() {
            policy.approved_tools.iter().cloned().collect()
        } else {
            custom_allow.iter().cloned().collect()
        };

        let blocked: BTreeSet<String> = policy
            .custom_guardrails
            .as_ref()
            .map(|g| g.block_lists.iter().cloned().collect())
            .unwrap_or_default();

        let digest = snapshot_digest(&approved, &blocked);
        Self {
            tenant_id: policy.tenant_id.clone(),
            domain_name: policy.domain_name.clone(),
            approved,
            blocked,
            digest,
        }
    }

    /// Block wins over approval; anything not approved is denied.
    pub fn check(&self, tool_name: &str) -> EnforcerVerdict {
        if self.blocked.contains(tool_name) {
            EnforcerVerdict::Denied {
                reason: DenyReason::Blocked,
            }
        } else if self.approved.contains(tool_name) {
            EnforcerVerdict::Allowed
        } else {
            EnforcerVerdict::Denied {
                reason: DenyReason::NotApproved,
            }
        }
    }

    pub fn is_allowed(&self, tool_name: &str) -> bool {
        self.check(tool_name).is_allowed()
    }

    pub fn approved(&self) -> BTreeSet<String> {
        self.approved.clone()
    }

    pub fn blocked(&self) -> BTreeSet<String> {
        self.blocked.clone()
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Hex sha256 of the effective approved/blocked sets.
    pub fn snapshot_digest(&self) -> &str {
        &self.digest
    }
}

fn snapshot_digest(approved: &BTreeSet<String>, blocked: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"approved\n");
    for name in approved {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"blocked\n");
    for name in blocked {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
