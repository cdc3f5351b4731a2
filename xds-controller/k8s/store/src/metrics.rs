use crate::SharedStore;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedStore);

pub fn register(reg: &mut Registry, store: SharedStore) {
    reg.register_collector(Box::new(Instrumented(store)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (entities, indices) = {
            let this = self.0.tables.read();
            let entities = [
                ("virtual_service", this.virtual_services.len()),
                ("virtual_service_template", this.templates.len()),
                ("listener", this.listeners.len()),
                ("route", this.routes.len()),
                ("http_filter", this.http_filters.len()),
                ("cluster", this.clusters.len()),
                ("access_log_config", this.access_log_configs.len()),
                ("tracing", this.tracings.len()),
                ("policy", this.policies.len()),
                ("secret", this.secrets.len()),
            ];
            let uids = this.virtual_services.uid_count()
                + this.templates.uid_count()
                + this.listeners.uid_count()
                + this.routes.uid_count()
                + this.http_filters.uid_count()
                + this.clusters.uid_count()
                + this.access_log_configs.uid_count()
                + this.tracings.uid_count()
                + this.policies.uid_count()
                + this.secrets.uid_count();
            let indices = [
                ("uid", uids),
                ("spec_cluster", this.spec_clusters.len()),
                ("template_virtual_services", this.template_vs.len()),
                ("domain_secret", this.domain_secrets.len()),
                ("listener_address", this.listener_addrs.by_addr.len()),
                ("node_domains", this.node_domains.len()),
            ];
            (entities, indices)
        };

        let mut entities_encoder = encoder.encode_descriptor(
            "store_entities",
            "The number of objects in the store",
            None,
            MetricType::Gauge,
        )?;
        for (kind, n) in entities {
            let labels = [("kind", kind)];
            let gauge = ConstGauge::new(n as u32);
            gauge.encode(entities_encoder.encode_family(&labels)?)?;
        }

        let mut indices_encoder = encoder.encode_descriptor(
            "store_index_size",
            "The number of entries in each store index",
            None,
            MetricType::Gauge,
        )?;
        for (index, n) in indices {
            let labels = [("index", index)];
            let gauge = ConstGauge::new(n as u32);
            gauge.encode(indices_encoder.encode_family(&labels)?)?;
        }

        let statuses = ConstGauge::new(self.0.status.len() as u32);
        statuses.encode(encoder.encode_descriptor(
            "store_statuses",
            "The number of recorded virtual service statuses",
            None,
            MetricType::Gauge,
        )?)?;

        if let Some(pool) = self.0.pool() {
            let stats = pool.stats();
            ConstGauge::new(stats.size as u32).encode(encoder.encode_descriptor(
                "string_pool_size",
                "The number of interned strings",
                None,
                MetricType::Gauge,
            )?)?;
            ConstCounter::new(stats.hits).encode(encoder.encode_descriptor(
                "string_pool_hits",
                "Interning requests served by an existing string",
                None,
                MetricType::Counter,
            )?)?;
            ConstCounter::new(stats.misses).encode(encoder.encode_descriptor(
                "string_pool_misses",
                "Interning requests that added a string",
                None,
                MetricType::Counter,
            )?)?;
        }

        Ok(())
    }
}
