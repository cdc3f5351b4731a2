//! Well-known labels and annotations.

use kube::api::ObjectMeta;

/// Comma-separated list of the nodes a virtual service is served to.
pub const NODE_ID_ANNOTATION: &str = "envoy.kaasops.io/node-id";

/// Comma-separated list of the domains a TLS secret may serve.
pub const DOMAINS_ANNOTATION: &str = "envoy.kaasops.io/domains";

/// When `true` on an access-log config, file loggers write to a per-virtual-service file.
pub const AUTO_GENERATED_FILENAME_ANNOTATION: &str = "envoy.kaasops.io/auto-generated-filename";

pub const SECRET_TYPE_LABEL: &str = "envoy.kaasops.io/secret-type";
pub const SDS_CACHED_SECRET_TYPE: &str = "sds-cached";

pub const ACCESS_GROUP_LABEL: &str = "exc-access-group";
pub const GENERAL_ACCESS_GROUP: &str = "general";

/// Selects the secrets that may be served over SDS.
pub const SDS_CACHED_SECRET_SELECTOR: &str = "envoy.kaasops.io/secret-type=sds-cached";

pub fn node_ids(meta: &ObjectMeta) -> Vec<String> {
    split_annotation(meta, NODE_ID_ANNOTATION)
}

pub fn secret_domains(meta: &ObjectMeta) -> Vec<String> {
    split_annotation(meta, DOMAINS_ANNOTATION)
}

/// The object's access group, falling back to the general group when unlabeled.
pub fn access_group(meta: &ObjectMeta) -> &str {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(ACCESS_GROUP_LABEL))
        .map(String::as_str)
        .filter(|g| !g.is_empty())
        .unwrap_or(GENERAL_ACCESS_GROUP)
}

/// Whether file access loggers should write to a per-virtual-service file. Absent means `false`.
pub fn auto_generated_filename(meta: &ObjectMeta) -> anyhow::Result<bool> {
    let Some(v) = annotation(meta, AUTO_GENERATED_FILENAME_ANNOTATION) else {
        return Ok(false);
    };
    match v.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => anyhow::bail!("{AUTO_GENERATED_FILENAME_ANNOTATION} annotation value must be true or false"),
    }
}

pub fn annotation<'m>(meta: &'m ObjectMeta, key: &str) -> Option<&'m str> {
    meta.annotations.as_ref()?.get(key).map(String::as_str)
}

fn split_annotation(meta: &ObjectMeta, key: &str) -> Vec<String> {
    annotation(meta, key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
