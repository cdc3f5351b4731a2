use crate::tls::SecretGroup;
use anyhow::{bail, Context, Result};
use envoy_xds_controller_core::{
    envoy::{self, well_known, Any, Validate},
    ResourceId,
};
use envoy_xds_controller_k8s_api::VirtualServiceCommonSpec;
use serde_json::Value;

/// Inputs shared by every filter chain of a virtual service.
#[derive(Clone, Debug)]
pub(crate) struct Params<'a> {
    pub(crate) vs: &'a ResourceId,
    pub(crate) http_filters: &'a [envoy::HttpFilter],
    pub(crate) access_logs: &'a [envoy::AccessLog],
    pub(crate) tracing: Option<&'a envoy::Tracing>,
    pub(crate) use_remote_address: Option<bool>,
    pub(crate) xff_num_trusted_hops: Option<u32>,
    pub(crate) upgrade_configs: &'a [Value],
}

/// Fails if the virtual service configures anything that would be built into a filter chain.
pub(crate) fn check_prebuilt_conflicts(spec: &VirtualServiceCommonSpec) -> Result<()> {
    let fields = [
        (spec.virtual_host.is_some(), "virtual host is set"),
        (!spec.additional_routes.is_empty(), "additional routes are set"),
        (!spec.http_filters.is_empty(), "http filters are set"),
        (!spec.additional_http_filters.is_empty(), "additional http filters are set"),
        (spec.tls_config.is_some(), "tls config is set"),
        (spec.rbac.is_some(), "rbac is set"),
        (spec.use_remote_address.is_some(), "use remote address is set"),
        (spec.xff_num_trusted_hops.is_some(), "xff_num_trusted_hops is set"),
        (!spec.upgrade_configs.is_empty(), "upgrade configs is set"),
        (spec.access_log.is_some(), "access log is set"),
        (spec.access_log_config.is_some(), "access log config is set"),
        (!spec.access_logs.is_empty(), "access logs are set"),
        (!spec.access_log_configs.is_empty(), "access log configs are set"),
    ];
    if let Some((_, what)) = fields.iter().find(|(set, _)| *set) {
        bail!("conflict: {what}, but filter chains are found in listener");
    }
    Ok(())
}

/// Builds one filter chain per secret group, or a single plaintext chain.
pub(crate) fn build(
    params: &Params<'_>,
    domains: &[String],
    groups: Option<&[SecretGroup]>,
) -> Result<Vec<envoy::FilterChain>> {
    let Some(groups) = groups else {
        let chain = chain(params, params.vs.to_string(), domains, None)
            .with_context(|| format!("failed to build filter chain for domains {}", domains.join(",")))?;
        return Ok(vec![chain]);
    };

    groups
        .iter()
        .map(|group| {
            let name = if groups.len() == 1 {
                params.vs.to_string()
            } else {
                format!("{}-{}-{}", params.vs, group.secret.namespace, group.secret.name)
            };
            chain(params, name, &group.domains, Some(&group.secret)).with_context(|| {
                format!(
                    "failed to build filter chain for domains {}",
                    group.domains.join(",")
                )
            })
        })
        .collect()
}

fn chain(
    params: &Params<'_>,
    name: String,
    domains: &[String],
    secret: Option<&ResourceId>,
) -> Result<envoy::FilterChain> {
    let route_config_name = params.vs.to_string();
    let hcm = envoy::HttpConnectionManager {
        codec_type: Some(well_known::CODEC_AUTO.to_string()),
        stat_prefix: route_config_name.replace('.', "-"),
        rds: Some(envoy::Rds::ads(route_config_name)),
        http_filters: params.http_filters.to_vec(),
        use_remote_address: Some(params.use_remote_address.unwrap_or(false)),
        xff_num_trusted_hops: params.xff_num_trusted_hops,
        upgrade_configs: params.upgrade_configs.to_vec(),
        access_log: params.access_logs.to_vec(),
        tracing: params.tracing.cloned(),
        ..Default::default()
    };
    let mut chain = envoy::FilterChain {
        name,
        filters: vec![envoy::Filter::new(
            well_known::HTTP_CONNECTION_MANAGER,
            Any::pack(well_known::HTTP_CONNECTION_MANAGER_TYPE, &hcm)?,
        )],
        ..Default::default()
    };

    if let Some(secret) = secret {
        if !domains.is_empty() && !domains.iter().any(|d| d == "*") {
            chain.filter_chain_match = Some(envoy::FilterChainMatch {
                server_names: domains.to_vec(),
                ..Default::default()
            });
        }
        chain.transport_socket = Some(envoy::TransportSocket::new(
            well_known::TLS_TRANSPORT_SOCKET,
            Any::pack(
                well_known::DOWNSTREAM_TLS_CONTEXT_TYPE,
                &envoy::DownstreamTlsContext::sds(secret.to_string()),
            )?,
        ));
    }

    chain.validate()?;
    Ok(chain)
}
