use crate::{Store, StoreKind};
use anyhow::{Context, Result};
use envoy_xds_controller_k8s_api::{
    AccessLogConfig, Cluster, HttpFilter, Listener, Policy, Route, Secret, Tracing, VirtualService,
    VirtualServiceTemplate,
};
use serde::de::DeserializeOwned;

/// Lists objects of every kind held by the store.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn list<K>(&self) -> Result<Vec<K>>
    where
        K: StoreKind + DeserializeOwned;
}

pub(crate) struct Objects {
    pub(crate) virtual_services: Vec<VirtualService>,
    pub(crate) templates: Vec<VirtualServiceTemplate>,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) routes: Vec<Route>,
    pub(crate) http_filters: Vec<HttpFilter>,
    pub(crate) clusters: Vec<Cluster>,
    pub(crate) access_log_configs: Vec<AccessLogConfig>,
    pub(crate) tracings: Vec<Tracing>,
    pub(crate) policies: Vec<Policy>,
    pub(crate) secrets: Vec<Secret>,
}

async fn list<K, S>(source: &S) -> Result<Vec<K>>
where
    K: StoreKind + DeserializeOwned,
    S: Source + ?Sized,
{
    source
        .list::<K>()
        .await
        .with_context(|| format!("failed to list {}", K::kind(&())))
}

// === impl Store ===

impl Store {
    /// Replaces the store's contents with everything the source lists.
    ///
    /// Kinds are listed concurrently. If any listing fails the store is left unchanged.
    pub async fn load<S: Source + ?Sized>(&self, source: &S) -> Result<()> {
        let (
            virtual_services,
            templates,
            listeners,
            routes,
            http_filters,
            clusters,
            access_log_configs,
            tracings,
            policies,
            secrets,
        ) = tokio::try_join!(
            list(source),
            list(source),
            list(source),
            list(source),
            list(source),
            list(source),
            list(source),
            list(source),
            list(source),
            list(source),
        )?;

        let objects = Objects {
            virtual_services,
            templates,
            listeners,
            routes,
            http_filters,
            clusters,
            access_log_configs,
            tracings,
            policies,
            secrets,
        };
        tracing::info!(
            virtual_services = objects.virtual_services.len(),
            templates = objects.templates.len(),
            listeners = objects.listeners.len(),
            clusters = objects.clusters.len(),
            secrets = objects.secrets.len(),
            "loaded store"
        );
        self.populate(objects);
        Ok(())
    }
}
