//! Shared types for the Envoy xDS controller.
//!
//! This crate has no knowledge of Kubernetes: it holds the resource identity type used to key
//! every index, the subset of the Envoy v3 configuration model that the controller needs to
//! inspect and synthesize, and a couple of small concurrency primitives (a string-interning
//! pool and an LRU cache with entry expiry) shared by the store and the resource builder.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod envoy;
pub mod intern;
mod resource_id;
pub mod scan;
pub mod ttl_cache;

pub use self::{
    intern::{PoolStats, StringPool},
    resource_id::ResourceId,
    ttl_cache::TtlCache,
};

/// The node-id list value that binds a virtual service to every known node.
pub const COMMON_NODE_ID: &str = "*";

/// Returns true if the node-id list marks a virtual service as common to all nodes.
pub fn is_common(node_ids: &[String]) -> bool {
    node_ids.len() == 1 && node_ids[0] == COMMON_NODE_ID
}
