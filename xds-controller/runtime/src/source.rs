use anyhow::Result;
use envoy_xds_controller_k8s_store::{Source, StoreKind};
use kube::{api::ListParams, runtime::watcher, Api, Client};
use serde::de::DeserializeOwned;

/// Lists objects from the cluster, optionally restricted to one namespace.
#[derive(Clone)]
pub(crate) struct ClusterSource {
    client: Client,
    namespace: Option<String>,
}

impl ClusterSource {
    pub(crate) fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }
}

#[async_trait::async_trait]
impl Source for ClusterSource {
    async fn list<K>(&self) -> Result<Vec<K>>
    where
        K: StoreKind + DeserializeOwned,
    {
        let mut params = ListParams::default();
        if let Some(labels) = K::LABEL_SELECTOR {
            params = params.labels(labels);
        }
        if let Some(ns) = self.namespace.as_deref() {
            params = params.fields(&namespace_selector(ns));
        }
        let api = Api::<K>::all(self.client.clone());
        let list = api.list(&params).await?;
        tracing::debug!(kind = %K::kind(&()), items = list.items.len(), "listed");
        Ok(list.items)
    }
}

/// The watch configuration matching what [`ClusterSource`] lists.
pub(crate) fn watcher_config<K: StoreKind>(namespace: Option<&str>) -> watcher::Config {
    let mut config = watcher::Config::default();
    if let Some(labels) = K::LABEL_SELECTOR {
        config = config.labels(labels);
    }
    if let Some(ns) = namespace {
        config = config.fields(&namespace_selector(ns));
    }
    config
}

fn namespace_selector(ns: &str) -> String {
    format!("metadata.namespace={ns}")
}
