use anyhow::{anyhow, bail, Context, Result};
use envoy_xds_controller_core::{envoy, ResourceId};
use envoy_xds_controller_k8s_api::{self as k8s, VirtualServiceCommonSpec};
use envoy_xds_controller_k8s_store::Store;

/// The HTTP tracing configuration, given inline or by reference.
pub(crate) fn resolve(
    spec: &VirtualServiceCommonSpec,
    vs: &ResourceId,
    store: &Store,
) -> Result<Option<envoy::Tracing>> {
    match (&spec.tracing, &spec.tracing_ref) {
        (Some(_), Some(_)) => bail!("only one of spec.tracing or spec.tracingRef may be set"),
        (Some(value), None) => envoy::from_value(value)
            .map(Some)
            .context("failed to unmarshal tracing"),
        (None, Some(r)) => {
            let id = r.id(&vs.namespace);
            let obj = store
                .get::<k8s::Tracing>(&id)
                .ok_or_else(|| anyhow!("tracing {id} not found"))?;
            obj.parse().map(Some).context("failed to unmarshal tracing")
        }
        (None, None) => Ok(None),
    }
}
