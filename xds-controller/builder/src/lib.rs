//! Translates a virtual service, together with the resources it references, into the Envoy
//! resources that serve it.
//!
//! Building is a pure function of the virtual service and the store it is read from: nothing is
//! written back. Results are cached by a digest of the virtual service and the store's dependency
//! epoch, so an unchanged virtual service over unchanged dependencies is built once.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod access_log;
mod clusters;
mod filter_chains;
mod http_filters;
mod key;
mod listener;
pub mod metrics;
mod rbac;
mod template;
mod tls;
mod tracing_provider;
mod virtual_host;


pub use self::{
    http_filters::position_router,
    listener::ListenerKind,
    template::{apply as apply_template, check_extra_fields},
    virtual_host::position_root_route,
};

use self::key::Key;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use envoy_xds_controller_core::{envoy, ResourceId, TtlCache};
use envoy_xds_controller_k8s_api::{VirtualService, VirtualServiceCommonSpec};
use envoy_xds_controller_k8s_store::Store;
use serde::Serialize;
use std::{sync::Arc, time::Duration};

/// Everything built for a single virtual service.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// The listener the filter chains are installed on.
    pub listener: ResourceId,
    pub filter_chains: Vec<envoy::FilterChain>,
    /// Absent when the listener brings its own filter chains.
    pub route_config: Option<envoy::RouteConfiguration>,
    pub clusters: Vec<envoy::Cluster>,
    pub secrets: Vec<envoy::Secret>,
    pub used_secrets: Vec<ResourceId>,
    pub domains: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cache_size: usize,
    pub cache_ttl: Duration,
}

#[derive(Debug)]
pub struct Builder {
    bundles: TtlCache<Key, Arc<Bundle>>,
    http_filters: TtlCache<Key, Arc<Vec<envoy::HttpFilter>>>,
    scans: TtlCache<Key, Arc<Vec<String>>>,
}

/// Sub-results are small and shared by many virtual services.
const SUB_CACHE_SIZE: usize = 1_000;

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_size: 100,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

// === impl Builder ===

impl Default for Builder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Builder {
    pub fn new(config: Config) -> Self {
        Self {
            bundles: TtlCache::new(config.cache_size, config.cache_ttl),
            http_filters: TtlCache::new(SUB_CACHE_SIZE, config.cache_ttl),
            scans: TtlCache::new(SUB_CACHE_SIZE, config.cache_ttl),
        }
    }

    /// Builds the resources for `vs` from the contents of `store`.
    pub fn build(&self, vs: &VirtualService, store: &Store) -> Result<Arc<Bundle>> {
        self.build_at(vs, store, Utc::now())
    }

    /// Builds as of `now`, which decides which certificates have expired.
    pub fn build_at(
        &self,
        vs: &VirtualService,
        store: &Store,
        now: DateTime<Utc>,
    ) -> Result<Arc<Bundle>> {
        let id = store.id_of(vs);
        // A cached bundle is only reused until the next certificate expiry.
        let expiry = store
            .next_secret_expiry(now)
            .map_or(i64::MAX, |t| t.timestamp());
        let key = key::Hasher::default()
            .str(&id.namespace)
            .str(&id.name)
            .u64(vs.metadata.generation.unwrap_or_default() as u64)
            .json(&vs.spec)?
            .u64(store.dependency_epoch())
            .u64(expiry as u64)
            .finish();
        if let Some(bundle) = self.bundles.get(&key) {
            tracing::trace!(vs = %id, "bundle cache hit");
            return Ok(bundle);
        }
        tracing::trace!(vs = %id, "bundle cache miss");

        let bundle = Arc::new(self.build_uncached(&id, vs, store, now)?);
        self.bundles.set(key, bundle.clone());
        Ok(bundle)
    }

    fn build_uncached(
        &self,
        id: &ResourceId,
        vs: &VirtualService,
        store: &Store,
        now: DateTime<Utc>,
    ) -> Result<Bundle> {
        let spec = template::apply(vs, store).context("failed to apply template")?;
        let listener = listener::resolve(&spec, id, store)?;

        if !listener.listener.filter_chains.is_empty() {
            filter_chains::check_prebuilt_conflicts(&spec)?;
            let mut names = clusters::Names::default();
            self.prebuilt_chain_clusters(&listener.listener.filter_chains, &mut names)?;
            return Ok(Bundle {
                listener: listener.id,
                filter_chains: listener.listener.filter_chains,
                route_config: None,
                clusters: names.resolve(store)?,
                secrets: vec![],
                used_secrets: vec![],
                domains: vec![],
            });
        }

        let http_filters = self.http_filters(&spec, id, store)?;
        let vhost = virtual_host::build(&spec, id, store)?;
        let route_config = virtual_host::route_config(vhost.clone(), &listener);

        let is_tls = listener.kind == ListenerKind::Tls;
        match (is_tls, spec.tls_config.is_some()) {
            (true, false) => {
                anyhow::bail!("tls listener not configured, virtual service has not tls config")
            }
            (false, true) => anyhow::bail!("listener is not tls, virtual service has tls config"),
            _ => {}
        }
        let groups = match &spec.tls_config {
            Some(tls) => Some(tls::secret_groups(tls, &vhost.domains, id, store, now)?),
            None => None,
        };

        let access_logs = access_log::build(&spec, id, store)?;
        let tracing_cfg = tracing_provider::resolve(&spec, id, store)?;
        let params = filter_chains::Params {
            vs: id,
            http_filters: http_filters.as_slice(),
            access_logs: &access_logs,
            tracing: tracing_cfg.as_ref(),
            use_remote_address: spec.use_remote_address,
            xff_num_trusted_hops: spec.xff_num_trusted_hops,
            upgrade_configs: &spec.upgrade_configs,
        };
        let filter_chains = filter_chains::build(&params, &vhost.domains, groups.as_deref())?;

        let mut names = clusters::Names::default();
        clusters::from_virtual_host(&vhost, &mut names);
        for filter in http_filters.iter() {
            self.scan_extension(filter, clusters::HTTP_FILTER_FIELDS, true, &mut names)?;
        }
        for log in &access_logs {
            self.scan_extension(log, clusters::ACCESS_LOG_FIELDS, true, &mut names)?;
        }
        if let Some(provider) = tracing_cfg.as_ref().and_then(|t| t.provider.as_ref()) {
            self.scan_extension(provider, clusters::TRACING_FIELDS, true, &mut names)?;
        }
        let clusters = names.resolve(store)?;

        let used_secrets = groups
            .iter()
            .flatten()
            .map(|g| g.secret.clone())
            .collect::<Vec<_>>();
        let secrets = tls::build_secrets(&used_secrets, store)?;

        Ok(Bundle {
            listener: listener.id,
            filter_chains,
            route_config: Some(route_config),
            clusters,
            secrets,
            used_secrets,
            domains: vhost.domains,
        })
    }

    /// Assembles the HTTP filter list, reusing a previous assembly when neither the inline
    /// configuration nor any referenced filter or policy changed.
    fn http_filters(
        &self,
        spec: &VirtualServiceCommonSpec,
        id: &ResourceId,
        store: &Store,
    ) -> Result<Arc<Vec<envoy::HttpFilter>>> {
        let key = http_filters::cache_key(spec, id, store)?;
        if let Some(filters) = self.http_filters.get(&key) {
            tracing::trace!(vs = %id, "http filter cache hit");
            return Ok(filters);
        }
        let filters = Arc::new(http_filters::build(spec, id, store)?);
        self.http_filters.set(key, filters.clone());
        Ok(filters)
    }

    fn prebuilt_chain_clusters(
        &self,
        chains: &[envoy::FilterChain],
        names: &mut clusters::Names,
    ) -> Result<()> {
        use envoy::well_known::{HTTP_CONNECTION_MANAGER_TYPE, TCP_PROXY_TYPE};

        for chain in chains {
            for filter in &chain.filters {
                let Some(tc) = filter.typed_config.as_ref() else {
                    continue;
                };
                if tc.is(HTTP_CONNECTION_MANAGER_TYPE) {
                    let hcm = tc
                        .unpack::<envoy::HttpConnectionManager>(HTTP_CONNECTION_MANAGER_TYPE)
                        .with_context(|| {
                            format!("failed to unmarshal http connection manager in filter chain {}", chain.name)
                        })?;
                    if let Some(rc) = &hcm.route_config {
                        for vh in &rc.virtual_hosts {
                            clusters::from_virtual_host(vh, names);
                        }
                    }
                    for hf in &hcm.http_filters {
                        self.scan_extension(hf, clusters::HTTP_FILTER_FIELDS, true, names)?;
                    }
                    for log in &hcm.access_log {
                        self.scan_extension(log, clusters::ACCESS_LOG_FIELDS, true, names)?;
                    }
                    if let Some(provider) = hcm.tracing.as_ref().and_then(|t| t.provider.as_ref()) {
                        self.scan_extension(provider, clusters::TRACING_FIELDS, true, names)?;
                    }
                } else if tc.is(TCP_PROXY_TYPE) {
                    let proxy = tc.unpack::<envoy::TcpProxy>(TCP_PROXY_TYPE).with_context(|| {
                        format!("failed to unmarshal tcp proxy in filter chain {}", chain.name)
                    })?;
                    for cluster in proxy.clusters() {
                        names.require(cluster);
                    }
                    for log in &proxy.access_log {
                        self.scan_extension(log, clusters::ACCESS_LOG_FIELDS, true, names)?;
                    }
                } else {
                    self.scan_extension(filter, clusters::GENERIC_FIELDS, false, names)?;
                }
            }
        }
        Ok(())
    }

    /// Collects cluster names from an extension's typed configuration.
    fn scan_extension(
        &self,
        ext: &envoy::Extension,
        fields: &'static [&'static str],
        required: bool,
        names: &mut clusters::Names,
    ) -> Result<()> {
        let Some(tc) = ext.typed_config.as_ref() else {
            return Ok(());
        };
        let key = key::Hasher::default()
            .strs(fields)
            .str(&tc.type_url)
            .json(&tc.value)?
            .finish();
        let found = match self.scans.get(&key) {
            Some(found) => found,
            None => {
                let found = Arc::new(clusters::scan_json(&tc.to_value(), fields));
                self.scans.set(key, found.clone());
                found
            }
        };
        for name in found.iter() {
            if required {
                names.require(name);
            } else {
                names.optional(name);
            }
        }
        Ok(())
    }
}

/// Renders an error with its full chain of context, as recorded in statuses.
pub fn error_message(error: &anyhow::Error) -> String {
    format!("{error:#}")
}
