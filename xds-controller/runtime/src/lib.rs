#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use envoy_xds_controller_builder as builder;
pub use envoy_xds_controller_core as core;
pub use envoy_xds_controller_k8s_api as k8s;
pub use envoy_xds_controller_k8s_store as store;
pub use envoy_xds_controller_updater as updater;

mod admission;
mod args;
mod index;
mod source;
mod validate;
pub mod validation;

pub use self::{args::Args, validate::ValidateArgs};
