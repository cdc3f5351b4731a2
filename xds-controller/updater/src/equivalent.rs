use envoy_xds_controller_core::ResourceId;
use envoy_xds_controller_k8s_api::{
    meta, AccessLogConfig, Cluster, HttpFilter, Listener, Policy, ResourceExt, Route, Secret,
    Tracing, VirtualService, VirtualServiceTemplate,
};
use envoy_xds_controller_k8s_store::{Store, StoreKind};

/// A kind whose updates can be recognized as having no effect on the built configuration.
pub trait Equivalent: StoreKind {
    fn is_equivalent(&self, other: &Self) -> bool;

    /// Clears state kept for the object outside of its table.
    fn forget(_store: &Store, _id: &ResourceId) {}
}

macro_rules! spec_equivalent {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Equivalent for $kind {
                fn is_equivalent(&self, other: &Self) -> bool {
                    self.spec == other.spec
                        && self.annotations() == other.annotations()
                        && self.labels() == other.labels()
                }
            }
        )+
    };
}

spec_equivalent!(
    Listener,
    Route,
    HttpFilter,
    Cluster,
    AccessLogConfig,
    Tracing,
    Policy,
);

impl Equivalent for VirtualService {
    fn is_equivalent(&self, other: &Self) -> bool {
        VirtualService::is_equivalent(self, other)
    }

    fn forget(store: &Store, id: &ResourceId) {
        store.status().delete(id);
    }
}

impl Equivalent for VirtualServiceTemplate {
    fn is_equivalent(&self, other: &Self) -> bool {
        VirtualServiceTemplate::is_equivalent(self, other)
    }
}

impl Equivalent for Secret {
    /// Only the key material and the domains a secret serves are used.
    fn is_equivalent(&self, other: &Self) -> bool {
        self.data == other.data
            && meta::secret_domains(&self.metadata) == meta::secret_domains(&other.metadata)
    }
}
