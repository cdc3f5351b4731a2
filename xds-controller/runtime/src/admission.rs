use crate::validation;
use anyhow::{anyhow, bail, Context, Result};
use envoy_xds_controller_builder::check_extra_fields;
use envoy_xds_controller_core::ResourceId;
use envoy_xds_controller_k8s_api::{
    meta, AccessLogConfig, Cluster, HttpFilter, Listener, Policy, ResourceExt, Route, Secret,
    Tracing, VirtualService, VirtualServiceTemplate,
};
use envoy_xds_controller_updater::Updater;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{core::admission::Operation, core::DynamicObject, Resource};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[cfg(test)]
mod tests;

/// Lets a virtual service through without validation. Meant for testing only.
const SKIP_VALIDATION_ANNOTATION: &str = "envoy.kaasops.io/skip-validation";

const DEBUG_STORE_PATH: &str = "/debug/store";

#[derive(Clone)]
pub struct Admission {
    updater: Arc<Updater>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

type Warnings = Vec<String>;

/// The objects of an admission request, decoded to `K`.
#[derive(Debug)]
struct Change<K> {
    operation: Operation,
    new: Option<K>,
    old: Option<K>,
}

trait Validate<K> {
    fn validate(&self, change: Change<K>) -> Result<Warnings>;
}

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() == http::Method::GET && req.uri().path() == DEBUG_STORE_PATH {
            let dump = self.updater.dump_store();
            return Box::pin(future::ready(json_response(&dump)));
        }

        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(&AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(&rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(updater: Arc<Updater>) -> Self {
        Self { updater }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        if is_kind::<VirtualService>(&req) {
            return self.admit_kind::<VirtualService>(req).await;
        }

        if is_kind::<VirtualServiceTemplate>(&req) {
            return self.admit_kind::<VirtualServiceTemplate>(req).await;
        }

        if is_kind::<Listener>(&req) {
            return self.admit_kind::<Listener>(req).await;
        }

        if is_kind::<Route>(&req) {
            return self.admit_kind::<Route>(req).await;
        }

        if is_kind::<HttpFilter>(&req) {
            return self.admit_kind::<HttpFilter>(req).await;
        }

        if is_kind::<Cluster>(&req) {
            return self.admit_kind::<Cluster>(req).await;
        }

        if is_kind::<AccessLogConfig>(&req) {
            return self.admit_kind::<AccessLogConfig>(req).await;
        }

        if is_kind::<Tracing>(&req) {
            return self.admit_kind::<Tracing>(req).await;
        }

        if is_kind::<Policy>(&req) {
            return self.admit_kind::<Policy>(req).await;
        }

        if is_kind::<Secret>(&req) {
            return self.admit_kind::<Secret>(req).await;
        }

        AdmissionResponse::invalid(format_args!(
            "unsupported resource type: {}.{}.{}",
            req.kind.group, req.kind.version, req.kind.kind
        ))
    }

    /// Decodes the request's objects and validates them off the async runtime, since dry builds
    /// are CPU-bound.
    async fn admit_kind<K>(self, req: AdmissionRequest) -> AdmissionResponse
    where
        K: DeserializeOwned + Send + 'static,
        Self: Validate<K>,
    {
        let mut rsp = AdmissionResponse::from(&req);

        let kind = req.kind.kind.clone();
        let ns = req.namespace.clone().unwrap_or_default();
        let name = req.name.clone();
        let change = match parse_change::<K>(req) {
            Ok(change) => change,
            Err(error) => {
                info!(%error, "Failed to parse {}", kind);
                return rsp.deny(error);
            }
        };

        match tokio::task::spawn_blocking(move || self.validate(change)).await {
            Ok(Ok(warnings)) => {
                if !warnings.is_empty() {
                    rsp.warnings = Some(warnings);
                }
                rsp
            }
            Ok(Err(error)) => {
                let message = format!("{error:#}");
                info!(error = %message, %ns, %name, %kind, "Denied");
                rsp.deny(message)
            }
            Err(error) => {
                warn!(%error, %ns, %name, %kind, "Validation task failed");
                rsp.deny(error)
            }
        }
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response<T: serde::Serialize>(rsp: &T) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("json response must be valid"))
}

fn parse_change<K: DeserializeOwned>(req: AdmissionRequest) -> Result<Change<K>> {
    let new = req.object.map(decode).transpose()?;
    let old = req.old_object.map(decode).transpose()?;
    if new.is_none() && !matches!(req.operation, Operation::Delete) {
        bail!("admission request missing 'object'");
    }
    Ok(Change {
        operation: req.operation,
        new,
        old,
    })
}

fn decode<K: DeserializeOwned>(obj: DynamicObject) -> Result<K> {
    let value = serde_json::to_value(obj)?;
    serde_json::from_value(value).map_err(|error| anyhow!("invalid object: {error}"))
}

impl Validate<VirtualService> for Admission {
    fn validate(&self, change: Change<VirtualService>) -> Result<Warnings> {
        let Change { operation, new, old } = change;
        let Some(vs) = new else {
            return Ok(Warnings::default());
        };
        let name = vs.name_any();

        if meta::annotation(&vs.metadata, SKIP_VALIDATION_ANNOTATION) == Some("true") {
            info!(%name, "Skipping validation due to annotation");
            return Ok(vec![
                "validation skipped via annotation - use only for testing".to_string(),
            ]);
        }

        if let Some(old) = &old {
            if old.is_equivalent(&vs) {
                debug!(%name, "Skipping validation: spec unchanged");
                return Ok(Warnings::default());
            }
        }

        validation::validate_name(&name)?;
        if matches!(operation, Operation::Create) {
            if let Some(group) = vs.labels().get(meta::ACCESS_GROUP_LABEL) {
                validation::validate_access_group(group)?;
            }
        }

        self.updater
            .validate_virtual_service(&vs, old.as_ref())
            .with_context(|| format!("failed to validate VirtualService {name}"))?;
        Ok(Warnings::default())
    }
}

impl Validate<VirtualServiceTemplate> for Admission {
    fn validate(&self, change: Change<VirtualServiceTemplate>) -> Result<Warnings> {
        let Some(template) = change.new else {
            return Ok(Warnings::default());
        };
        if let Some(old) = &change.old {
            if old.is_equivalent(&template) {
                return Ok(Warnings::default());
            }
        }

        check_extra_fields(&template)?;
        self.updater
            .dry_build_with_template(&template)
            .with_context(|| {
                format!(
                    "failed to build snapshot with VirtualServiceTemplate {}",
                    template.name_any()
                )
            })?;
        Ok(Warnings::default())
    }
}

/// Kinds whose configuration is only checked to decode.
macro_rules! validate_parses {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Validate<$kind> for Admission {
                fn validate(&self, change: Change<$kind>) -> Result<Warnings> {
                    if let Some(obj) = change.new {
                        obj.parse().with_context(|| {
                            format!("invalid {} {}", <$kind>::kind(&()), obj.name_any())
                        })?;
                    }
                    Ok(Warnings::default())
                }
            }
        )+
    };
}

validate_parses!(
    Listener,
    Route,
    HttpFilter,
    Cluster,
    AccessLogConfig,
    Tracing,
    Policy,
);

impl Validate<Secret> for Admission {
    fn validate(&self, change: Change<Secret>) -> Result<Warnings> {
        match (change.operation, change.new, change.old) {
            (Operation::Delete, _, Some(old)) => {
                let id = ResourceId::new(old.namespace().unwrap_or_default(), old.name_any());
                if let Some(vss) = self.updater.used_secrets().get(&id) {
                    let vss = vss.iter().map(ToString::to_string).collect::<Vec<_>>();
                    bail!("secret {id} is still used in virtual service: {}", vss.join(", "));
                }
                Ok(Warnings::default())
            }
            (_, Some(secret), _) => {
                for domain in meta::secret_domains(&secret.metadata) {
                    let check = || -> Result<()> {
                        validation::validate_domain_pattern(&domain)?;
                        validation::validate_domain(&domain)?;
                        Ok(())
                    };
                    check().with_context(|| format!("domain {domain} is invalid"))?;
                }
                Ok(Warnings::default())
            }
            _ => Ok(Warnings::default()),
        }
    }
}
