#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod meta;
mod opaque;
mod resource_ref;
mod virtual_service;
mod virtual_service_template;

pub use self::{
    opaque::{AccessLogConfig, Cluster, HttpFilter, JsonObject, Listener, Policy, Route, Tracing},
    resource_ref::ResourceRef,
    virtual_service::{
        Modifier, RbacSpec, TemplateOption, TlsConfig, VirtualService, VirtualServiceCommonSpec,
        VirtualServiceSpec,
    },
    virtual_service_template::{ExtraField, VirtualServiceTemplate, VirtualServiceTemplateSpec},
};
pub use k8s_openapi::{api::core::v1::Secret, ByteString};
pub use kube::api::{ObjectMeta, ResourceExt};

pub const GROUP: &str = "envoy.kaasops.io";
pub const VERSION: &str = "v1alpha1";
