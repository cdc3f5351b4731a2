use crate::{admission::Admission, builder, core::StringPool, index::Index, k8s, source, store, updater};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "envoy-xds-controller", about = "An Envoy xDS configuration controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "envoy_xds_controller=info,warn",
        env = "ENVOY_XDS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Interns the strings of ingested objects.
    #[clap(
        long,
        env = "STORE_USE_OPTIMIZED",
        default_value = "true",
        action = clap::ArgAction::Set,
        value_parser = parse_flag
    )]
    store_use_optimized: bool,

    /// Maintains the node-domains index so that admission can validate virtual services without
    /// a full dry build.
    #[clap(
        long,
        env = "WEBHOOK_VALIDATION_INDICES",
        default_value = "false",
        action = clap::ArgAction::Set,
        value_parser = parse_flag
    )]
    webhook_validation_indices: bool,

    /// Restricts watches to a single namespace.
    #[clap(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    #[clap(long, default_value = "100")]
    builder_cache_size: usize,

    #[clap(long, default_value = "300")]
    builder_cache_ttl_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            store_use_optimized,
            webhook_validation_indices,
            watch_namespace,
            builder_cache_size,
            builder_cache_ttl_secs,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let store = store::Store::shared(store_use_optimized.then(StringPool::shared));
        let builder = Arc::new(builder::Builder::new(builder::Config {
            cache_size: builder_cache_size,
            cache_ttl: Duration::from_secs(builder_cache_ttl_secs),
        }));
        let shutdown = CancellationToken::new();
        let updater = Arc::new(updater::Updater::new(
            store.clone(),
            Arc::new(updater::MemorySnapshotCache::default()),
            builder.clone(),
            updater::Config {
                index_node_domains: webhook_validation_indices,
            },
            shutdown.clone(),
        ));

        let mut prom = <Registry>::default();
        store::metrics::register(prom.sub_registry_with_prefix("store"), store);
        builder::metrics::register(prom.sub_registry_with_prefix("builder"), builder);
        updater::metrics::register(prom.sub_registry_with_prefix("updater"), updater.clone());
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Rebuilds stop at the next virtual service once shutdown begins.
        let drain = runtime.shutdown_handle();
        tokio::spawn(async move {
            let _release = drain.signaled().await;
            shutdown.cancel();
        });

        // Serve the cluster's current contents before watching for changes.
        let source = source::ClusterSource::new(runtime.client(), watch_namespace.clone());
        updater.load(&source).await?;
        info!(
            nodes = updater.cache().node_ids().len(),
            namespace = watch_namespace.as_deref().unwrap_or("*"),
            "initial snapshots installed"
        );

        // Spawn resource watches.
        let ns = watch_namespace.as_deref();
        watch::<k8s::VirtualService, _>(&mut runtime, &updater, ns);
        watch::<k8s::VirtualServiceTemplate, _>(&mut runtime, &updater, ns);
        watch::<k8s::Listener, _>(&mut runtime, &updater, ns);
        watch::<k8s::Route, _>(&mut runtime, &updater, ns);
        watch::<k8s::HttpFilter, _>(&mut runtime, &updater, ns);
        watch::<k8s::Cluster, _>(&mut runtime, &updater, ns);
        watch::<k8s::AccessLogConfig, _>(&mut runtime, &updater, ns);
        watch::<k8s::Tracing, _>(&mut runtime, &updater, ns);
        watch::<k8s::Policy, _>(&mut runtime, &updater, ns);
        watch::<k8s::Secret, _>(&mut runtime, &updater, ns);

        let admission = Admission::new(updater);
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn watch<K, S: 'static>(
    runtime: &mut kubert::Runtime<S>,
    updater: &Arc<updater::Updater>,
    namespace: Option<&str>,
) where
    K: updater::Equivalent + DeserializeOwned,
{
    let kind = K::kind(&()).to_string();
    let events = runtime.watch_all::<K>(source::watcher_config::<K>(namespace));
    tokio::spawn(
        kubert::index::namespaced(Index::<K>::shared(updater.clone()), events)
            .instrument(info_span!("watch", %kind)),
    );
}

/// Parses a boolean setting. `1`, `true`, `yes` and `on` are true, in any case; anything else is
/// false.
fn parse_flag(s: &str) -> Result<bool, std::convert::Infallible> {
    let v = s.trim().to_ascii_lowercase();
    Ok(matches!(v.as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", true)]
    #[case("true", true)]
    #[case("TRUE", true)]
    #[case("Yes", true)]
    #[case("on", true)]
    #[case("0", false)]
    #[case("false", false)]
    #[case("off", false)]
    #[case("", false)]
    #[case("maybe", false)]
    fn flags(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(parse_flag(value), Ok(expected));
    }

    #[test]
    fn parses_settings() {
        let args = Args::try_parse_from([
            "envoy-xds-controller",
            "--store-use-optimized",
            "off",
            "--webhook-validation-indices",
            "yes",
            "--watch-namespace",
            "envoy",
            "--builder-cache-size",
            "10",
        ])
        .expect("args must parse");
        assert!(!args.store_use_optimized);
        assert!(args.webhook_validation_indices);
        assert_eq!(args.watch_namespace.as_deref(), Some("envoy"));
        assert_eq!(args.builder_cache_size, 10);
        assert_eq!(args.builder_cache_ttl_secs, 300);
        assert!(!args.admission_controller_disabled);
    }
}
