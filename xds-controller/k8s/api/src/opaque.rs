//! Resources whose spec is an Envoy configuration fragment stored verbatim.
//!
//! These specs are arbitrary JSON (or a list of JSON objects), which the `CustomResource` derive
//! cannot describe, so `kube::Resource` is implemented directly.

use anyhow::{ensure, Result};
use envoy_xds_controller_core::envoy;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

pub type JsonObject = serde_json::Map<String, Value>;

macro_rules! opaque_resource {
    ($(#[$attr:meta])* $kind:ident, $plural:literal, $spec:ty) => {
        $(#[$attr])*
        #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
        pub struct $kind {
            #[serde(default)]
            pub metadata: ObjectMeta,
            #[serde(default)]
            pub spec: $spec,
        }

        impl $kind {
            pub fn new(namespace: &str, name: &str, spec: $spec) -> Self {
                Self {
                    metadata: ObjectMeta {
                        namespace: Some(namespace.to_string()),
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    spec,
                }
            }
        }

        impl kube::Resource for $kind {
            type DynamicType = ();
            type Scope = k8s_openapi::NamespaceResourceScope;

            fn kind(_: &()) -> Cow<'_, str> {
                stringify!($kind).into()
            }

            fn group(_: &()) -> Cow<'_, str> {
                crate::GROUP.into()
            }

            fn version(_: &()) -> Cow<'_, str> {
                crate::VERSION.into()
            }

            fn plural(_: &()) -> Cow<'_, str> {
                $plural.into()
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

opaque_resource!(
    /// An Envoy listener. Its filter chains, when present, are served as-is.
    Listener,
    "listeners",
    JsonObject
);
opaque_resource!(
    /// An Envoy upstream cluster.
    Cluster,
    "clusters",
    JsonObject
);
opaque_resource!(AccessLogConfig, "accesslogconfigs", JsonObject);
opaque_resource!(Tracing, "tracings", JsonObject);
opaque_resource!(
    /// An RBAC policy referenced by virtual services.
    Policy,
    "policies",
    JsonObject
);
opaque_resource!(
    /// A list of Envoy routes appended to a virtual host.
    Route,
    "routes",
    Vec<Value>
);
opaque_resource!(
    /// A list of Envoy HTTP filters appended to a connection manager.
    HttpFilter,
    "httpfilters",
    Vec<Value>
);

fn decode<T: serde::de::DeserializeOwned>(spec: &JsonObject) -> Result<T> {
    ensure!(!spec.is_empty(), "spec is empty");
    envoy::from_value(&Value::Object(spec.clone()))
}

fn decode_all<T: serde::de::DeserializeOwned>(spec: &[Value]) -> Result<Vec<T>> {
    ensure!(!spec.is_empty(), "spec is empty");
    spec.iter().map(envoy::from_value).collect()
}

// === impl Listener ===

impl Listener {
    pub fn parse(&self) -> Result<envoy::Listener> {
        decode(&self.spec)
    }
}

// === impl Cluster ===

impl Cluster {
    pub fn parse(&self) -> Result<envoy::Cluster> {
        decode(&self.spec)
    }

    /// The Envoy name of the cluster, which routes refer to.
    pub fn spec_name(&self) -> Option<&str> {
        self.spec
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
    }
}

impl AccessLogConfig {
    pub fn parse(&self) -> Result<envoy::AccessLog> {
        decode(&self.spec)
    }
}

impl Tracing {
    pub fn parse(&self) -> Result<envoy::Tracing> {
        decode(&self.spec)
    }
}

impl Policy {
    pub fn parse(&self) -> Result<envoy::RbacPolicy> {
        decode(&self.spec)
    }
}

impl Route {
    pub fn parse(&self) -> Result<Vec<envoy::Route>> {
        decode_all(&self.spec)
    }
}

impl HttpFilter {
    pub fn parse(&self) -> Result<Vec<envoy::HttpFilter>> {
        decode_all(&self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;
    use serde_json::json;

    #[test]
    fn decodes_objects() {
        let route: Route = serde_json::from_value(json!({
            "apiVersion": "envoy.kaasops.io/v1alpha1",
            "kind": "Route",
            "metadata": { "namespace": "ns", "name": "r" },
            "spec": [{ "match": { "prefix": "/" }, "route": { "cluster": "c" } }],
        }))
        .unwrap();
        assert_eq!(route.spec.len(), 1);
        assert_eq!(Route::api_version(&()), "envoy.kaasops.io/v1alpha1");
        assert_eq!(Route::plural(&()), "routes");
        assert_eq!(route.meta().name.as_deref(), Some("r"));
        assert_eq!(route.parse().unwrap()[0].clusters().len(), 1);
    }

    #[test]
    fn empty_specs_do_not_parse() {
        assert_eq!(
            Listener::default().parse().unwrap_err().to_string(),
            "spec is empty"
        );
        assert!(HttpFilter::default().parse().is_err());
    }

    #[test]
    fn cluster_spec_name() {
        let cluster = Cluster::new(
            "ns",
            "c",
            json!({ "name": "backend", "connect_timeout": "1s" })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(cluster.spec_name(), Some("backend"));
        assert_eq!(cluster.parse().unwrap().name, "backend");
    }
}
