use crate::{meta, ResourceRef};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;

/// Composes a listener, a virtual host, routes and filters into a routing unit that is served to
/// a set of nodes.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "envoy.kaasops.io",
    version = "v1alpha1",
    kind = "VirtualService",
    shortname = "vs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    #[serde(flatten)]
    pub common: VirtualServiceCommonSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ResourceRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_options: Vec<TemplateOption>,

    /// Values substituted for `{{ .Name }}` placeholders in the template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_fields: BTreeMap<String, String>,
}

/// Fields shared by virtual services and their templates.
///
/// Envoy configuration fragments are kept as raw JSON and decoded by the resource builder.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceCommonSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_host: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_log: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_log_config: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_logs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_log_configs: Vec<ResourceRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_http_filters: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_routes: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_filters: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_remote_address: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xff_num_trusted_hops: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_configs: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac: Option<RbacSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_ref: Option<ResourceRef>,
}

#[derive(
    Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<ResourceRef>,
    /// Selects secrets by the domains they are annotated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_discovery: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RbacSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_policies: Vec<ResourceRef>,
}

/// Controls how a single field of the template is combined with the virtual service.
#[derive(
    Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct TemplateOption {
    /// A dotted path into the spec, e.g. `virtualHost.domains`.
    pub field: String,
    #[serde(default)]
    pub modifier: Modifier,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    #[default]
    Merge,
    Replace,
    Delete,
}

// === impl VirtualService ===

impl VirtualService {
    pub fn node_ids(&self) -> Vec<String> {
        meta::node_ids(&self.metadata)
    }

    pub fn access_group(&self) -> &str {
        meta::access_group(&self.metadata)
    }

    /// Returns true if both objects would build the same configuration.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.spec == other.spec
            && self.annotations() == other.annotations()
            && self.labels() == other.labels()
    }
}
