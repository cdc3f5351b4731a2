use anyhow::{anyhow, bail, ensure, Context, Result};
use envoy_xds_controller_core::{
    envoy::{self, well_known},
    ResourceId,
};
use envoy_xds_controller_k8s_api::{meta, AccessLogConfig, ResourceRef, VirtualServiceCommonSpec};
use envoy_xds_controller_k8s_store::Store;
use serde_json::Value;

/// Resolves the access loggers of a virtual service from whichever of the four exclusive forms
/// it uses.
pub(crate) fn build(
    spec: &VirtualServiceCommonSpec,
    vs: &ResourceId,
    store: &Store,
) -> Result<Vec<envoy::AccessLog>> {
    let forms = [
        spec.access_log.is_some(),
        spec.access_log_config.is_some(),
        !spec.access_logs.is_empty(),
        !spec.access_log_configs.is_empty(),
    ];
    if forms.iter().filter(|set| **set).count() > 1 {
        bail!("can't use accessLog, accessLogConfig, accessLogs and accessLogConfigs at the same time");
    }

    if let Some(value) = &spec.access_log {
        tracing::warn!(%vs, "accessLog is deprecated, use accessLogs instead");
        return Ok(vec![inline(value)?]);
    }
    if let Some(r) = &spec.access_log_config {
        tracing::warn!(%vs, "accessLogConfig is deprecated, use accessLogConfigs instead");
        return Ok(vec![referenced(r, vs, store)?]);
    }
    if !spec.access_logs.is_empty() {
        return spec.access_logs.iter().map(inline).collect();
    }
    spec.access_log_configs
        .iter()
        .map(|r| referenced(r, vs, store))
        .collect()
}

fn inline(value: &Value) -> Result<envoy::AccessLog> {
    envoy::from_value(value).context("failed to unmarshal access log")
}

fn referenced(r: &ResourceRef, vs: &ResourceId, store: &Store) -> Result<envoy::AccessLog> {
    let id = r.id(&vs.namespace);
    let obj = store
        .get::<AccessLogConfig>(&id)
        .ok_or_else(|| anyhow!("can't find accessLogConfig {id}"))?;
    let mut log = obj
        .parse()
        .with_context(|| format!("failed to unmarshal accessLogConfig {id}"))?;
    if meta::auto_generated_filename(&obj.metadata)? {
        append_file_name(&mut log, &vs.name)
            .with_context(|| format!("invalid accessLogConfig {id}"))?;
    }
    Ok(log)
}

/// Points a file access logger at a file named after the virtual service, under the configured
/// path.
fn append_file_name(log: &mut envoy::AccessLog, vs_name: &str) -> Result<()> {
    let config = log
        .typed_config
        .as_mut()
        .filter(|tc| tc.is(well_known::FILE_ACCESS_LOG_TYPE))
        .ok_or_else(|| anyhow!("access log config type must be of type file"))?;
    let path = config
        .value
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim_end_matches('/');
    ensure!(!path.is_empty(), "file access log path is empty");
    let path = format!("{path}/{vs_name}.log");
    config.value.insert("path".to_string(), Value::String(path));
    Ok(())
}
