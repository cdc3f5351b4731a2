use crate::{listeners::ListenerAddrs, Table, Tables};
use envoy_xds_controller_core::ResourceId;
use envoy_xds_controller_k8s_api::{
    AccessLogConfig, Cluster, HttpFilter, Listener, Policy, Route, Secret, Tracing, VirtualService,
    VirtualServiceTemplate,
};
use std::{fmt, sync::Arc};

/// A resource kind held by the store.
pub trait StoreKind:
    kube::Resource<DynamicType = ()> + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Whether changes to objects of this kind may change the configuration built for virtual
    /// services that do not themselves change.
    const IS_DEPENDENCY: bool = true;

    /// A label selector restricting which objects are loaded.
    const LABEL_SELECTOR: Option<&'static str> = None;

    fn table(tables: &Tables) -> &Table<Self>;

    fn table_mut(tables: &mut Tables) -> &mut Table<Self>;

    /// Updates derived indices after `obj` is inserted.
    fn index(_tables: &mut Tables, _id: &ResourceId, _obj: &Arc<Self>) {}

    /// Updates derived indices after `obj` is removed or replaced.
    fn unindex(_tables: &mut Tables, _id: &ResourceId, _obj: &Arc<Self>) {}
}

macro_rules! table {
    ($field:ident) => {
        fn table(tables: &Tables) -> &Table<Self> {
            &tables.$field
        }

        fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
            &mut tables.$field
        }
    };
}

impl StoreKind for VirtualService {
    const IS_DEPENDENCY: bool = false;

    table!(virtual_services);

    fn index(tables: &mut Tables, id: &ResourceId, obj: &Arc<Self>) {
        if let Some(template) = &obj.spec.template {
            let tid = template.id(&id.namespace);
            tables.template_vs.entry(tid).or_default().push(id.clone());
        }
    }

    fn unindex(tables: &mut Tables, id: &ResourceId, obj: &Arc<Self>) {
        let Some(template) = &obj.spec.template else {
            return;
        };
        let tid = template.id(&id.namespace);
        if let Some(vss) = tables.template_vs.get_mut(&tid) {
            vss.retain(|v| v != id);
            if vss.is_empty() {
                tables.template_vs.remove(&tid);
            }
        }
    }
}

impl StoreKind for VirtualServiceTemplate {
    table!(templates);
}

impl StoreKind for Listener {
    table!(listeners);

    fn index(tables: &mut Tables, _: &ResourceId, _: &Arc<Self>) {
        tables.listener_addrs = ListenerAddrs::build(&tables.listeners);
    }

    fn unindex(tables: &mut Tables, _: &ResourceId, _: &Arc<Self>) {
        tables.listener_addrs = ListenerAddrs::build(&tables.listeners);
    }
}

impl StoreKind for Route {
    table!(routes);
}

impl StoreKind for HttpFilter {
    table!(http_filters);
}

impl StoreKind for Cluster {
    table!(clusters);

    fn index(tables: &mut Tables, id: &ResourceId, obj: &Arc<Self>) {
        if let Some(name) = obj.spec_name() {
            if let Some(prev) = tables.spec_clusters.insert(name.to_string(), id.clone()) {
                if prev != *id {
                    tracing::debug!(cluster = %name, %prev, current = %id, "cluster name reassigned");
                }
            }
        }
    }

    fn unindex(tables: &mut Tables, id: &ResourceId, obj: &Arc<Self>) {
        if let Some(name) = obj.spec_name() {
            // Only drop the entry if another object has not since claimed the name.
            if tables.spec_clusters.get(name) == Some(id) {
                tables.spec_clusters.remove(name);
            }
        }
    }
}

impl StoreKind for AccessLogConfig {
    table!(access_log_configs);
}

impl StoreKind for Tracing {
    table!(tracings);
}

impl StoreKind for Policy {
    table!(policies);
}

impl StoreKind for Secret {
    const LABEL_SELECTOR: Option<&'static str> =
        Some(envoy_xds_controller_k8s_api::meta::SDS_CACHED_SECRET_SELECTOR);

    table!(secrets);

    fn index(tables: &mut Tables, id: &ResourceId, obj: &Arc<Self>) {
        tables.domain_secrets.add(id, obj);
    }

    fn unindex(tables: &mut Tables, id: &ResourceId, obj: &Arc<Self>) {
        tables.domain_secrets.remove(id, obj);
    }
}
