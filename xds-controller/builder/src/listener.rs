use anyhow::{anyhow, Context, Result};
use envoy_xds_controller_core::{envoy, ResourceId};
use envoy_xds_controller_k8s_api::{Listener, VirtualServiceCommonSpec};
use envoy_xds_controller_k8s_store::Store;

/// How a listener terminates connections.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    /// Inspects the TLS handshake to select a filter chain.
    Tls,
    /// Proxies raw TCP.
    Tcp,
    Http,
}

#[derive(Clone, Debug)]
pub(crate) struct ResolvedListener {
    pub(crate) id: ResourceId,
    pub(crate) listener: envoy::Listener,
    pub(crate) kind: ListenerKind,
    pub(crate) is_443: bool,
}

// === impl ListenerKind ===

impl ListenerKind {
    pub fn of(listener: &envoy::Listener) -> Self {
        if listener.has_tls_inspector() {
            Self::Tls
        } else if listener.has_tcp_proxy() {
            Self::Tcp
        } else {
            Self::Http
        }
    }
}

/// Finds and parses the listener a virtual service is attached to. The parsed listener is named
/// after its resource.
pub(crate) fn resolve(
    spec: &VirtualServiceCommonSpec,
    vs: &ResourceId,
    store: &Store,
) -> Result<ResolvedListener> {
    let lref = spec
        .listener
        .as_ref()
        .filter(|l| !l.name.is_empty())
        .ok_or_else(|| anyhow!("listener is not set"))?;
    let id = lref.id(&vs.namespace);
    let obj = store
        .get::<Listener>(&id)
        .ok_or_else(|| anyhow!("listener {id} not found"))?;
    let mut listener = obj
        .parse()
        .with_context(|| format!("failed to unmarshal listener {id}"))?;
    listener.name = id.to_string();

    Ok(ResolvedListener {
        kind: ListenerKind::of(&listener),
        is_443: listener.port() == Some(443),
        id,
        listener,
    })
}
