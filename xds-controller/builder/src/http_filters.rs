use crate::{key, rbac};
use anyhow::{anyhow, bail, Context, Result};
use envoy_xds_controller_core::{
    envoy::{self, well_known, Any, Rbac},
    ResourceId,
};
use envoy_xds_controller_k8s_api::{self as k8s, VirtualServiceCommonSpec};
use envoy_xds_controller_k8s_store::Store;

/// Assembles the HTTP filters of a virtual service: the RBAC filter, then inline filters, then
/// referenced filters, with the router moved to the end.
pub(crate) fn build(
    spec: &VirtualServiceCommonSpec,
    vs: &ResourceId,
    store: &Store,
) -> Result<Vec<envoy::HttpFilter>> {
    let mut filters = Vec::new();

    if let Some(rbac) = &spec.rbac {
        let rules = rbac::build(rbac, vs, store)?;
        let config = Any::pack(
            well_known::RBAC_TYPE,
            &Rbac {
                rules: Some(rules),
                ..Default::default()
            },
        )?;
        filters.push(envoy::HttpFilter::new(well_known::RBAC_FILTER, config));
    }

    for (i, value) in spec.http_filters.iter().enumerate() {
        let filter = envoy::from_value::<envoy::HttpFilter>(value)
            .with_context(|| format!("failed to unmarshal http filter {i}"))?;
        filters.push(filter);
    }

    for r in &spec.additional_http_filters {
        let id = r.id(&vs.namespace);
        let obj = store
            .get::<k8s::HttpFilter>(&id)
            .ok_or_else(|| anyhow!("http filter {id} not found"))?;
        let parsed = obj
            .parse()
            .with_context(|| format!("failed to unmarshal http filter {id}"))?;
        filters.extend(parsed);
    }

    position_router(&mut filters)?;
    Ok(filters)
}

/// Moves the router filter to the end of the list. At most one router may be present.
pub fn position_router(filters: &mut Vec<envoy::HttpFilter>) -> Result<()> {
    let mut routers = filters
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is(well_known::ROUTER_TYPE))
        .map(|(i, _)| i);
    let Some(idx) = routers.next() else {
        return Ok(());
    };
    if routers.next().is_some() {
        bail!("multiple root router http filters");
    }
    if idx != filters.len() - 1 {
        let router = filters.remove(idx);
        filters.push(router);
    }
    Ok(())
}

/// A digest of everything the filter list is assembled from, including the current contents of
/// every referenced filter and policy.
pub(crate) fn cache_key(
    spec: &VirtualServiceCommonSpec,
    vs: &ResourceId,
    store: &Store,
) -> Result<key::Key> {
    let mut hasher = key::Hasher::default()
        .json(&spec.rbac)?
        .json(&spec.http_filters)?;
    for r in &spec.additional_http_filters {
        let id = r.id(&vs.namespace);
        let spec = store.get::<k8s::HttpFilter>(&id).map(|f| f.spec.clone());
        hasher = hasher.str(&id.to_string()).json(&spec)?;
    }
    for r in spec.rbac.iter().flat_map(|r| r.additional_policies.iter()) {
        let id = r.id(&vs.namespace);
        let spec = store.get::<k8s::Policy>(&id).map(|p| p.spec.clone());
        hasher = hasher.str(&id.to_string()).json(&spec)?;
    }
    Ok(hasher.finish())
}
