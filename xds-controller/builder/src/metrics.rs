use crate::Builder;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Debug)]
struct Instrumented(Arc<Builder>);

pub fn register(reg: &mut Registry, builder: Arc<Builder>) {
    reg.register_collector(Box::new(Instrumented(builder)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let caches = [
            ("bundle", self.0.bundles.len(), self.0.bundles.hits(), self.0.bundles.misses()),
            (
                "http_filters",
                self.0.http_filters.len(),
                self.0.http_filters.hits(),
                self.0.http_filters.misses(),
            ),
            ("cluster_scan", self.0.scans.len(), self.0.scans.hits(), self.0.scans.misses()),
        ];

        let mut size_encoder = encoder.encode_descriptor(
            "builder_cache_entries",
            "The number of entries held by each builder cache",
            None,
            MetricType::Gauge,
        )?;
        for (cache, len, _, _) in caches {
            let labels = [("cache", cache)];
            ConstGauge::new(len as u32).encode(size_encoder.encode_family(&labels)?)?;
        }

        let mut hits_encoder = encoder.encode_descriptor(
            "builder_cache_hits",
            "Lookups answered by a builder cache",
            None,
            MetricType::Counter,
        )?;
        for (cache, _, hits, _) in caches {
            let labels = [("cache", cache)];
            ConstCounter::new(hits).encode(hits_encoder.encode_family(&labels)?)?;
        }

        let mut misses_encoder = encoder.encode_descriptor(
            "builder_cache_misses",
            "Lookups a builder cache could not answer",
            None,
            MetricType::Counter,
        )?;
        for (cache, _, _, misses) in caches {
            let labels = [("cache", cache)];
            ConstCounter::new(misses).encode(misses_encoder.encode_family(&labels)?)?;
        }

        Ok(())
    }
}
