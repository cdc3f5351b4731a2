use super::{Any, Extra};
use serde::{Deserialize, Serialize};

/// A named extension with a typed configuration: filters, listener filters, access loggers,
/// transport sockets and tracing providers all share this shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        default,
        alias = "typedConfig",
        skip_serializing_if = "Option::is_none"
    )]
    pub typed_config: Option<Any>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Extension {
    pub fn new(name: impl Into<String>, typed_config: Any) -> Self {
        Self {
            name: name.into(),
            typed_config: Some(typed_config),
            extra: Extra::default(),
        }
    }

    /// Returns true if the extension is configured with `type_url`.
    pub fn is(&self, type_url: &str) -> bool {
        self.typed_config.as_ref().is_some_and(|tc| tc.is(type_url))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(
        default,
        alias = "socketAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub socket_address: Option<SocketAddress>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SocketAddress {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, alias = "portValue", skip_serializing_if = "Option::is_none")]
    pub port_value: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ads: Option<Extra>,
    #[serde(
        default,
        alias = "resourceApiVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_api_version: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ConfigSource {
    /// A v3 source served over the aggregated discovery stream.
    pub fn ads() -> Self {
        Self {
            ads: Some(Extra::default()),
            resource_api_version: Some(super::well_known::RESOURCE_API_VERSION_V3.to_string()),
            extra: Extra::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(default, alias = "inlineString", skip_serializing_if = "Option::is_none")]
    pub inline_string: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl DataSource {
    pub fn inline(s: impl Into<String>) -> Self {
        Self {
            inline_string: Some(s.into()),
            extra: Extra::default(),
        }
    }
}
