use super::{AccessLog, ConfigSource, Extension, Extra, HttpFilter, RouteConfiguration};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConnectionManager {
    #[serde(default, alias = "codecType", skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<String>,
    #[serde(default, alias = "statPrefix", skip_serializing_if = "String::is_empty")]
    pub stat_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds: Option<Rds>,
    #[serde(default, alias = "routeConfig", skip_serializing_if = "Option::is_none")]
    pub route_config: Option<RouteConfiguration>,
    #[serde(default, alias = "httpFilters", skip_serializing_if = "Vec::is_empty")]
    pub http_filters: Vec<HttpFilter>,
    #[serde(
        default,
        alias = "useRemoteAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub use_remote_address: Option<bool>,
    #[serde(
        default,
        alias = "xffNumTrustedHops",
        skip_serializing_if = "Option::is_none"
    )]
    pub xff_num_trusted_hops: Option<u32>,
    #[serde(default, alias = "upgradeConfigs", skip_serializing_if = "Vec::is_empty")]
    pub upgrade_configs: Vec<Value>,
    #[serde(default, alias = "accessLog", skip_serializing_if = "Vec::is_empty")]
    pub access_log: Vec<AccessLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<Tracing>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rds {
    #[serde(default, alias = "configSource", skip_serializing_if = "Option::is_none")]
    pub config_source: Option<ConfigSource>,
    #[serde(
        default,
        alias = "routeConfigName",
        skip_serializing_if = "String::is_empty"
    )]
    pub route_config_name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager.Tracing`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Extension>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Rds {
    pub fn ads(route_config_name: impl Into<String>) -> Self {
        Self {
            config_source: Some(ConfigSource::ads()),
            route_config_name: route_config_name.into(),
            extra: Extra::default(),
        }
    }
}
