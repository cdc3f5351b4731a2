use super::{Extra, Validate};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `envoy.extensions.filters.http.rbac.v3.RBAC`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rbac {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<RbacRules>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RbacRules {
    #[serde(default)]
    pub action: RbacAction,
    /// Ordered by name so that the encoded filter is stable.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, RbacPolicy>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RbacAction {
    #[default]
    Allow,
    Deny,
    Log,
}

/// A single policy. Permissions and principals are kept as opaque matchers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RbacPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl std::str::FromStr for RbacAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ALLOW" => Ok(Self::Allow),
            "DENY" => Ok(Self::Deny),
            "LOG" => Ok(Self::Log),
            s => anyhow::bail!("invalid rbac action {s}"),
        }
    }
}

impl Validate for RbacPolicy {
    fn validate(&self) -> Result<()> {
        ensure!(!self.permissions.is_empty(), "policy has no permissions");
        ensure!(!self.principals.is_empty(), "policy has no principals");
        Ok(())
    }
}
