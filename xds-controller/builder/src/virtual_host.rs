use crate::listener::{ListenerKind, ResolvedListener};
use ahash::AHashSet as HashSet;
use anyhow::{anyhow, bail, ensure, Context, Result};
use envoy_xds_controller_core::{
    envoy::{self, ClusterRef, Validate},
    ResourceId,
};
use envoy_xds_controller_k8s_api::{self as k8s, VirtualServiceCommonSpec};
use envoy_xds_controller_k8s_store::Store;

/// The name of the catch-all virtual host added to TLS listeners on port 443.
pub(crate) const MISDIRECTED_VHOST: &str = "421vh";

/// Builds the virtual host of a virtual service, named after it, with referenced routes appended
/// and any root route moved last.
pub(crate) fn build(
    spec: &VirtualServiceCommonSpec,
    vs: &ResourceId,
    store: &Store,
) -> Result<envoy::VirtualHost> {
    let value = spec
        .virtual_host
        .as_ref()
        .ok_or_else(|| anyhow!("virtual host is empty"))?;
    let mut vhost = envoy::from_value::<envoy::VirtualHost>(value)
        .context("failed to unmarshal virtual host")?;
    vhost.name = vs.to_string();

    for r in &spec.additional_routes {
        let id = r.id(&vs.namespace);
        let obj = store
            .get::<k8s::Route>(&id)
            .ok_or_else(|| anyhow!("route {id} not found"))?;
        let routes = obj
            .parse()
            .with_context(|| format!("failed to unmarshal route {id}"))?;
        for (i, route) in routes.iter().enumerate() {
            check_clusters(route, store)
                .with_context(|| format!("invalid cluster reference in route {id}[{i}]"))?;
        }
        vhost.routes.extend(routes);
    }

    position_root_route(&mut vhost.routes)?;
    vhost.validate()?;
    check_duplicate_domains(&vhost.domains)?;
    Ok(vhost)
}

/// Moves the root route, matching every path, to the end of the list. At most one root route may
/// be present.
pub fn position_root_route(routes: &mut Vec<envoy::Route>) -> Result<()> {
    let mut roots = routes
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_root())
        .map(|(i, _)| i);
    let Some(idx) = roots.next() else {
        return Ok(());
    };
    if roots.next().is_some() {
        bail!("multiple root routes found");
    }
    if idx != routes.len() - 1 {
        let root = routes.remove(idx);
        routes.push(root);
    }
    Ok(())
}

fn check_clusters(route: &envoy::Route, store: &Store) -> Result<()> {
    for cluster in route.clusters() {
        match cluster {
            ClusterRef::Direct(name) => ensure!(
                store.get_spec_cluster(name).is_some(),
                "cluster {name} not found"
            ),
            ClusterRef::Weighted(name) => ensure!(
                store.get_spec_cluster(name).is_some(),
                "weighted cluster {name} not found"
            ),
        }
    }
    Ok(())
}

fn check_duplicate_domains(domains: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(domains.len());
    for d in domains {
        if !seen.insert(d.as_str()) {
            bail!("duplicate domain found: {d}");
        }
    }
    Ok(())
}

/// Wraps the virtual host in a route configuration of the same name.
///
/// TLS listeners on port 443 also answer requests for hosts they do not serve with a 421, so that
/// clients reusing a connection across hosts retry on a new one.
pub(crate) fn route_config(
    vhost: envoy::VirtualHost,
    listener: &ResolvedListener,
) -> envoy::RouteConfiguration {
    let serves_any = vhost.domains.len() == 1 && vhost.domains[0] == "*";
    let mut virtual_hosts = vec![vhost];
    if listener.kind == ListenerKind::Tls && listener.is_443 && !serves_any {
        virtual_hosts.push(misdirected_vhost());
    }
    envoy::RouteConfiguration {
        name: virtual_hosts[0].name.clone(),
        virtual_hosts,
        ..Default::default()
    }
}

fn misdirected_vhost() -> envoy::VirtualHost {
    envoy::VirtualHost {
        name: MISDIRECTED_VHOST.to_string(),
        domains: vec!["*".to_string()],
        routes: vec![envoy::Route {
            matcher: Some(envoy::RouteMatch {
                prefix: Some("/".to_string()),
                ..Default::default()
            }),
            direct_response: Some(envoy::DirectResponse {
                status: 421,
                body: None,
                extra: Default::default(),
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}
