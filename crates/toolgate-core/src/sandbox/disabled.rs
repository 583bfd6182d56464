//! Tenant kill-switches for individual tools.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::domain::TenantId;

/// Answers whether a tenant has switched a tool off.
pub trait DisabledTools: Send + Sync {
    fn is_disabled(&self, tenant: &TenantId, tool: &str) -> bool;
}

/// In-memory disabled set.
#[derive(Debug, Default)]
pub struct StaticDisabledTools {
    disabled: RwLock<HashMap<TenantId, BTreeSet<String>>>,
}

impl StaticDisabledTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self, tenant: &TenantId, tool: impl Into<String>) {
        self.disabled
            .write()
            .entry(tenant.clone())
            .or_default()
            .insert(tool.into());
    }

    pub fn enable(&self, tenant: &TenantId, tool: &str) {
        if let Some(tools) = self.disabled.write().get_mut(tenant) {
            tools.remove(tool);
        }
    }
}

impl DisabledTools for StaticDisabledTools {
    fn is_disabled(&self, tenant: &TenantId, tool: &str) -> bool {
        self.disabled
            .read()
            .get(tenant)
            .is_some_and(|tools| tools.contains(tool))
    }
}
