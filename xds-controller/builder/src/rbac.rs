use anyhow::{anyhow, ensure, Context, Result};
use envoy_xds_controller_core::{
    envoy::{RbacAction, RbacPolicy, RbacRules, Validate},
    ResourceId,
};
use envoy_xds_controller_k8s_api::{Policy, RbacSpec};
use envoy_xds_controller_k8s_store::Store;
use std::collections::BTreeMap;

/// Builds RBAC rules from inline policies and referenced `Policy` resources.
pub(crate) fn build(spec: &RbacSpec, vs: &ResourceId, store: &Store) -> Result<RbacRules> {
    ensure!(!spec.action.is_empty(), "rbac action is empty");
    let action = spec.action.parse::<RbacAction>()?;
    ensure!(
        !spec.policies.is_empty() || !spec.additional_policies.is_empty(),
        "rbac policies is empty"
    );

    let mut policies = BTreeMap::new();
    for (name, value) in &spec.policies {
        let policy = envoy_xds_controller_core::envoy::from_value::<RbacPolicy>(value)
            .and_then(|p| p.validate().map(|()| p))
            .with_context(|| format!("failed to unmarshal rbac policy {name}"))?;
        policies.insert(name.clone(), policy);
    }

    for r in &spec.additional_policies {
        let id = r.id(&vs.namespace);
        let obj = store
            .get::<Policy>(&id)
            .ok_or_else(|| anyhow!("rbac policy {id} not found"))?;
        let name = id.name.to_string();
        ensure!(
            !policies.contains_key(&name),
            "policy '{name}' already exist in RBAC"
        );
        let policy = obj
            .parse()
            .and_then(|p| p.validate().map(|()| p))
            .with_context(|| format!("failed to unmarshal rbac policy {id}"))?;
        policies.insert(name, policy);
    }

    Ok(RbacRules {
        action,
        policies,
        ..Default::default()
    })
}
