use super::{AccessLog, Extra, WeightedCluster};
use serde::{Deserialize, Serialize};

/// `envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpProxy {
    #[serde(default, alias = "statPrefix", skip_serializing_if = "String::is_empty")]
    pub stat_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(
        default,
        alias = "weightedClusters",
        skip_serializing_if = "Option::is_none"
    )]
    pub weighted_clusters: Option<WeightedCluster>,
    #[serde(default, alias = "accessLog", skip_serializing_if = "Vec::is_empty")]
    pub access_log: Vec<AccessLog>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl TcpProxy {
    /// Every cluster the proxy may forward to.
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.cluster
            .as_deref()
            .into_iter()
            .chain(
                self.weighted_clusters
                    .iter()
                    .flat_map(|wc| wc.clusters.iter().map(|c| c.name.as_str())),
            )
            .filter(|c| !c.is_empty())
    }
}
