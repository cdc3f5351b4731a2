use crate::VirtualServiceCommonSpec;
use kube::ResourceExt;

/// A virtual-service-shaped base that virtual services are merged onto.
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
    kind = "VirtualServiceTemplate",
    shortname = "vst",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceTemplateSpec {
    #[serde(flatten)]
    pub common: VirtualServiceCommonSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_fields: Vec<ExtraField>,
}

/// A parameter a virtual service supplies to the template.
#[derive(
    Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct ExtraField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl VirtualServiceTemplate {
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.spec == other.spec && self.annotations() == other.annotations()
    }
}
