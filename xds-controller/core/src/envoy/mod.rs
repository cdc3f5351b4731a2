//! The subset of the Envoy v3 configuration model that the controller reads and writes.
//!
//! Types decode the proto-JSON form. Fields are named after their proto counterparts in
//! `snake_case` and also accept the `camelCase` spelling. Every message keeps the fields it does
//! not model in an `extra` map so that configurations round-trip without loss.

mod any;
mod base;
mod cluster;
mod hcm;
mod listener;
mod rbac;
mod route;
mod tcp_proxy;
mod tls;
pub mod well_known;

pub use self::{
    any::Any,
    base::{Address, ConfigSource, DataSource, Extension, SocketAddress},
    cluster::Cluster,
    hcm::{HttpConnectionManager, Rds, Tracing},
    listener::{FilterChain, FilterChainMatch, Listener},
    rbac::{Rbac, RbacAction, RbacPolicy, RbacRules},
    route::{
        ClusterRef, ClusterWeight, DirectResponse, Route, RouteAction, RouteConfiguration, RouteMatch,
        VirtualHost, WeightedCluster,
    },
    tcp_proxy::TcpProxy,
    tls::{CommonTlsContext, DownstreamTlsContext, SdsSecretConfig, Secret, TlsCertificate},
};

/// Fields carried through without interpretation.
pub type Extra = serde_json::Map<String, serde_json::Value>;

pub type Filter = Extension;
pub type HttpFilter = Extension;
pub type ListenerFilter = Extension;
pub type AccessLog = Extension;
pub type TransportSocket = Extension;

/// Structural checks applied to decoded configuration before it is emitted.
pub trait Validate {
    fn validate(&self) -> anyhow::Result<()>;
}

/// Decodes a message from an arbitrary JSON value.
pub fn from_value<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> anyhow::Result<T> {
    Ok(serde_json::from_value(value.clone())?)
}

#[cfg(test)]
mod tests;
