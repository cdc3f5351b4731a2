use crate::Updater;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::{atomic::Ordering, Arc};

#[derive(Debug)]
struct Instrumented(Arc<Updater>);

pub fn register(reg: &mut Registry, updater: Arc<Updater>) {
    reg.register_collector(Box::new(Instrumented(updater)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let nodes = self.0.cache.node_ids().len();
        ConstGauge::new(nodes as u32).encode(encoder.encode_descriptor(
            "snapshot_nodes",
            "The number of nodes with an installed snapshot",
            None,
            MetricType::Gauge,
        )?)?;

        let secrets = self.0.used_secrets.read().len();
        ConstGauge::new(secrets as u32).encode(encoder.encode_descriptor(
            "used_secrets",
            "The number of secrets served to at least one node",
            None,
            MetricType::Gauge,
        )?)?;

        ConstCounter::new(self.0.rebuilds.load(Ordering::Relaxed)).encode(
            encoder.encode_descriptor(
                "snapshot_rebuilds",
                "Rebuilds of every node's snapshot",
                None,
                MetricType::Counter,
            )?,
        )?;
        ConstCounter::new(self.0.failed_rebuilds.load(Ordering::Relaxed)).encode(
            encoder.encode_descriptor(
                "snapshot_rebuild_failures",
                "Rebuilds that installed nothing because of a conflict or cancellation",
                None,
                MetricType::Counter,
            )?,
        )?;

        Ok(())
    }
}
