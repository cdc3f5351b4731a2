use super::*;
use envoy_xds_controller_builder::Builder;
use envoy_xds_controller_k8s_api::JsonObject;
use envoy_xds_controller_k8s_store::Store;
use envoy_xds_controller_updater::{Config, MemorySnapshotCache};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const NS: &str = "ns";

fn mk_admission(index_node_domains: bool) -> Admission {
    let updater = Updater::new(
        Store::shared(None),
        Arc::new(MemorySnapshotCache::default()),
        Arc::new(Builder::default()),
        Config { index_node_domains },
        CancellationToken::new(),
    );
    let store = updater.store();
    store.set(Listener::new(
        NS,
        "http",
        mk_object(json!({
            "name": "http",
            "address": { "socket_address": { "address": "0.0.0.0", "port_value": 8080 } },
        })),
    ));
    store.set(Cluster::new(
        NS,
        "c1",
        mk_object(json!({ "name": "c1", "connect_timeout": "1s" })),
    ));
    Admission::new(Arc::new(updater))
}

fn mk_object(value: Value) -> JsonObject {
    value.as_object().cloned().expect("must be an object")
}

fn mk_vs(name: &str, domains: &[&str]) -> Value {
    json!({
        "apiVersion": "envoy.kaasops.io/v1alpha1",
        "kind": "VirtualService",
        "metadata": {
            "name": name,
            "namespace": NS,
            "annotations": { meta::NODE_ID_ANNOTATION: "n1" },
        },
        "spec": {
            "listener": { "name": "http" },
            "virtualHost": {
                "domains": domains,
                "routes": [{ "match": { "prefix": "/" }, "route": { "cluster": "c1" } }],
            },
        },
    })
}

fn mk_request(
    operation: &str,
    kind: (&str, &str, &str),
    object: Option<Value>,
    old: Option<Value>,
) -> AdmissionRequest {
    let (group, version, kind) = kind;
    let name = object
        .as_ref()
        .or(old.as_ref())
        .and_then(|o| o["metadata"]["name"].as_str())
        .unwrap_or_default()
        .to_string();
    let review = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "00000000-0000-0000-0000-000000000000",
            "kind": { "group": group, "version": version, "kind": kind },
            "resource": { "group": group, "version": version, "resource": kind.to_lowercase() },
            "name": name,
            "namespace": NS,
            "operation": operation,
            "userInfo": {},
            "object": object,
            "oldObject": old,
            "dryRun": false,
        },
    });
    let review = serde_json::from_value::<Review>(review).expect("valid review");
    review.try_into().expect("valid request")
}

const VS: (&str, &str, &str) = ("envoy.kaasops.io", "v1alpha1", "VirtualService");

/// Returns the denial message, if any.
async fn admit(admission: &Admission, req: AdmissionRequest) -> Result<Vec<String>, String> {
    let rsp = admission.clone().admit(req).await;
    let review = serde_json::to_value(rsp.into_review()).expect("must encode");
    let rsp = &review["response"];
    if rsp["allowed"].as_bool() == Some(true) {
        let warnings = rsp["warnings"]
            .as_array()
            .map(|ws| ws.iter().filter_map(|w| w.as_str().map(String::from)).collect())
            .unwrap_or_default();
        return Ok(warnings);
    }
    Err(rsp["status"]["message"].as_str().unwrap_or_default().to_string())
}

#[tokio::test(flavor = "multi_thread")]
async fn admits_valid_virtual_service() {
    let admission = mk_admission(false);
    let req = mk_request("CREATE", VS, Some(mk_vs("web", &["a.com"])), None);
    assert_eq!(admit(&admission, req).await, Ok(vec![]));
}

#[tokio::test(flavor = "multi_thread")]
async fn denies_conflicting_domain() {
    let admission = mk_admission(true);
    let existing = serde_json::from_value::<VirtualService>(mk_vs("web", &["a.com"])).unwrap();
    admission.updater.apply_virtual_service(existing).unwrap();

    let req = mk_request("CREATE", VS, Some(mk_vs("other", &["a.com"])), None);
    let error = admit(&admission, req).await.unwrap_err();
    assert_eq!(
        error,
        "failed to validate VirtualService other: duplicate domain 'a.com' for node n1"
    );

    // Updating the virtual service that owns the domain is fine.
    let req = mk_request(
        "UPDATE",
        VS,
        Some(mk_vs("web", &["a.com", "b.com"])),
        Some(mk_vs("web", &["a.com"])),
    );
    assert_eq!(admit(&admission, req).await, Ok(vec![]));
}

#[tokio::test(flavor = "multi_thread")]
async fn denies_invalid_names_and_groups() {
    let admission = mk_admission(false);
    let req = mk_request("CREATE", VS, Some(mk_vs("Web", &["a.com"])), None);
    assert!(admit(&admission, req).await.unwrap_err().starts_with("name must contain"));

    let mut vs = mk_vs("web", &["a.com"]);
    vs["metadata"]["labels"] = json!({ meta::ACCESS_GROUP_LABEL: "general" });
    let req = mk_request("CREATE", VS, Some(vs.clone()), None);
    assert_eq!(
        admit(&admission, req).await,
        Err("forbidden to create virtual service in general access group".to_string())
    );

    // Existing virtual services may keep the general group.
    let req = mk_request("UPDATE", VS, Some(vs), Some(mk_vs("web", &["b.com"])));
    assert_eq!(admit(&admission, req).await, Ok(vec![]));
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_validation_annotation_warns() {
    let admission = mk_admission(false);
    let mut vs = mk_vs("web", &["a.com"]);
    vs["spec"]["listener"]["name"] = json!("missing");
    vs["metadata"]["annotations"][SKIP_VALIDATION_ANNOTATION] = json!("true");
    let req = mk_request("CREATE", VS, Some(vs), None);
    let warnings = admit(&admission, req).await.unwrap();
    assert_eq!(warnings.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn denies_unbuildable_virtual_service() {
    let admission = mk_admission(false);
    let mut vs = mk_vs("web", &["a.com"]);
    vs["spec"]["listener"]["name"] = json!("missing");
    let req = mk_request("CREATE", VS, Some(vs), None);
    let error = admit(&admission, req).await.unwrap_err();
    assert!(error.contains("listener ns/missing not found"), "{error}");
}

#[tokio::test(flavor = "multi_thread")]
async fn deletes_are_admitted() {
    let admission = mk_admission(false);
    let req = mk_request("DELETE", VS, None, Some(mk_vs("web", &["a.com"])));
    assert_eq!(admit(&admission, req).await, Ok(vec![]));
}

#[tokio::test(flavor = "multi_thread")]
async fn listener_must_parse() {
    let admission = mk_admission(false);
    let listener = |spec: Value| {
        json!({
            "apiVersion": "envoy.kaasops.io/v1alpha1",
            "kind": "Listener",
            "metadata": { "name": "l", "namespace": NS },
            "spec": spec,
        })
    };
    let kind = ("envoy.kaasops.io", "v1alpha1", "Listener");

    let ok = listener(json!({
        "name": "l",
        "address": { "socket_address": { "address": "0.0.0.0", "port_value": 80 } },
    }));
    let req = mk_request("CREATE", kind, Some(ok), None);
    assert_eq!(admit(&admission, req).await, Ok(vec![]));

    let bad = listener(json!({ "name": "l", "address": "not an address" }));
    let req = mk_request("CREATE", kind, Some(bad), None);
    assert!(admit(&admission, req).await.unwrap_err().starts_with("invalid Listener l"));
}

#[tokio::test(flavor = "multi_thread")]
async fn template_must_build_its_virtual_services() {
    let admission = mk_admission(false);
    let kind = ("envoy.kaasops.io", "v1alpha1", "VirtualServiceTemplate");
    let template = |listener: &str| {
        json!({
            "apiVersion": "envoy.kaasops.io/v1alpha1",
            "kind": "VirtualServiceTemplate",
            "metadata": { "name": "t", "namespace": NS },
            "spec": { "listener": { "name": listener } },
        })
    };

    let mut vs = mk_vs("web", &["a.com"]);
    vs["spec"]["template"] = json!({ "name": "t" });
    vs["spec"].as_object_mut().unwrap().remove("listener");
    let t = serde_json::from_value::<VirtualServiceTemplate>(template("http")).unwrap();
    admission.updater.apply_virtual_service_template(t).unwrap();
    let vs = serde_json::from_value::<VirtualService>(vs).unwrap();
    admission.updater.apply_virtual_service(vs).unwrap();

    let req = mk_request("UPDATE", kind, Some(template("http2")), Some(template("http")));
    let error = admit(&admission, req).await.unwrap_err();
    assert!(error.contains("virtual service ns/web"), "{error}");
}

#[tokio::test(flavor = "multi_thread")]
async fn secrets_in_use_cannot_be_deleted() {
    let admission = mk_admission(false);
    let secret = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": "cert", "namespace": NS },
        "data": { "tls.crt": "Y2VydA==", "tls.key": "a2V5" },
    });
    let kind = ("", "v1", "Secret");
    let req = mk_request("DELETE", kind, None, Some(secret.clone()));
    assert_eq!(admit(&admission, req).await, Ok(vec![]));

    let updater = &admission.updater;
    updater.store().set(Listener::new(
        NS,
        "https",
        mk_object(json!({
            "name": "https",
            "address": { "socket_address": { "address": "0.0.0.0", "port_value": 443 } },
            "listener_filters": [{
                "name": "envoy.filters.listener.tls_inspector",
                "typed_config": { "@type": envoy_xds_controller_core::envoy::well_known::TLS_INSPECTOR_TYPE },
            }],
        })),
    ));
    updater
        .apply(serde_json::from_value::<Secret>(secret.clone()).unwrap())
        .unwrap();
    let mut vs = mk_vs("tls", &["a.com"]);
    vs["spec"]["listener"]["name"] = json!("https");
    vs["spec"]["tlsConfig"] = json!({ "secretRef": { "name": "cert" } });
    updater
        .apply_virtual_service(serde_json::from_value(vs).unwrap())
        .unwrap();

    let req = mk_request("DELETE", kind, None, Some(secret.clone()));
    assert_eq!(
        admit(&admission, req).await,
        Err("secret ns/cert is still used in virtual service: ns/tls".to_string())
    );

    let mut bad = secret;
    bad["metadata"]["annotations"] = json!({ meta::DOMAINS_ANNOTATION: "a.com,*example.com" });
    let req = mk_request("UPDATE", kind, Some(bad), None);
    assert_eq!(
        admit(&admission, req).await,
        Err(
            "domain *example.com is invalid: wildcard must be followed by dot \
             (e.g., *.example.com, not *example.com)"
                .to_string()
        )
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn secret_domains_must_be_valid_names() {
    let admission = mk_admission(false);
    let secret = |domains: &str| {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": "cert",
                "namespace": NS,
                "annotations": { meta::DOMAINS_ANNOTATION: domains },
            },
        })
    };
    let kind = ("", "v1", "Secret");

    let req = mk_request("CREATE", kind, Some(secret("a.com,*.b.com")), None);
    assert_eq!(admit(&admission, req).await, Ok(vec![]));

    let req = mk_request("CREATE", kind, Some(secret("a.com,a_b.com")), None);
    assert_eq!(
        admit(&admission, req).await,
        Err("domain a_b.com is invalid: invalid character in domain name".to_string())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_kinds_are_invalid() {
    let admission = mk_admission(false);
    let req = mk_request(
        "CREATE",
        ("", "v1", "ConfigMap"),
        Some(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "c" } })),
        None,
    );
    let error = admit(&admission, req).await.unwrap_err();
    assert_eq!(error, "unsupported resource type: .v1.ConfigMap");
}
