use super::*;
use chrono::Duration;
use envoy_xds_controller_k8s_api::{
    meta, ByteString, ObjectMeta, ResourceRef, VirtualServiceSpec,
};
use maplit::btreemap;
use openssl::{
    asn1::Asn1Time,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::PKey,
    x509::{X509NameBuilder, X509},
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use serde_json::{json, Value};

fn mk_id(ns: &str, name: &str) -> ResourceId {
    ResourceId::new(ns, name)
}

fn mk_meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        uid: Some(format!("uid-{ns}-{name}")),
        ..Default::default()
    }
}

fn mk_vs(ns: &str, name: &str, template: Option<&str>) -> VirtualService {
    VirtualService {
        metadata: mk_meta(ns, name),
        spec: VirtualServiceSpec {
            template: template.map(ResourceRef::new),
            ..Default::default()
        },
    }
}

fn mk_listener(ns: &str, name: &str, port: u32) -> Listener {
    let mut l = Listener::new(
        ns,
        name,
        json!({
            "name": name,
            "address": { "socket_address": { "address": "0.0.0.0", "port_value": port } },
        })
        .as_object()
        .cloned()
        .unwrap(),
    );
    l.metadata.uid = Some(format!("uid-{ns}-{name}"));
    l
}

fn mk_cluster(ns: &str, name: &str, envoy_name: &str) -> Cluster {
    Cluster::new(
        ns,
        name,
        json!({ "name": envoy_name }).as_object().cloned().unwrap(),
    )
}

fn mk_cert_pem(not_after: DateTime<Utc>) -> String {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "test").unwrap();
    let name = name.build();

    let mut cert = X509::builder().unwrap();
    cert.set_version(2).unwrap();
    cert.set_subject_name(&name).unwrap();
    cert.set_issuer_name(&name).unwrap();
    cert.set_pubkey(&key).unwrap();
    let not_before = not_after - Duration::days(365);
    cert.set_not_before(&Asn1Time::from_unix(not_before.timestamp()).unwrap())
        .unwrap();
    cert.set_not_after(&Asn1Time::from_unix(not_after.timestamp()).unwrap())
        .unwrap();
    cert.sign(&key, MessageDigest::sha256()).unwrap();
    String::from_utf8(cert.build().to_pem().unwrap()).unwrap()
}

#[derive(Copy, Clone, Debug)]
enum Cert {
    Valid,
    Expired,
    Garbage,
}

impl Cert {
    fn pem(self) -> String {
        match self {
            Self::Valid => mk_cert_pem(Utc::now() + Duration::days(30)),
            Self::Expired => mk_cert_pem(Utc::now() - Duration::days(1)),
            Self::Garbage => "-----BEGIN CERTIFICATE-----\nbm90IGEgY2VydA==\n-----END CERTIFICATE-----\n".to_string(),
        }
    }
}

fn mk_secret(ns: &str, name: &str, domains: &str, pem: String) -> Secret {
    Secret {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                meta::SECRET_TYPE_LABEL.to_string() => meta::SDS_CACHED_SECRET_TYPE.to_string(),
            }),
            annotations: Some(btreemap! {
                meta::DOMAINS_ANNOTATION.to_string() => domains.to_string(),
            }),
            ..Default::default()
        },
        data: Some(btreemap! {
            "tls.crt".to_string() => ByteString(pem.into_bytes()),
            "tls.key".to_string() => ByteString(b"key".to_vec()),
        }),
        ..Default::default()
    }
}

#[test]
fn set_get_delete() {
    let store = Store::default();
    store.set(mk_vs("ns", "a", None));
    store.set(mk_vs("ns", "b", None));

    let id = mk_id("ns", "a");
    assert!(store.exists::<VirtualService>(&id));
    assert_eq!(store.len::<VirtualService>(), 2);
    assert_eq!(
        store
            .get_by_uid::<VirtualService>("uid-ns-b")
            .and_then(|vs| vs.metadata.name.clone()),
        Some("b".to_string())
    );
    assert_eq!(
        store.list::<VirtualService>().keys().cloned().collect::<Vec<_>>(),
        vec![mk_id("ns", "a"), mk_id("ns", "b")]
    );

    assert!(store.delete::<VirtualService>(&id).is_some());
    assert!(store.delete::<VirtualService>(&id).is_none());
    assert!(store.get::<VirtualService>(&id).is_none());
    assert!(store.get_by_uid::<VirtualService>("uid-ns-a").is_none());
}

#[test]
fn replacement_updates_uid_index() {
    let store = Store::default();
    store.set(mk_vs("ns", "a", None));
    let mut recreated = mk_vs("ns", "a", None);
    recreated.metadata.uid = Some("uid-2".to_string());
    store.set(recreated);

    assert!(store.get_by_uid::<VirtualService>("uid-ns-a").is_none());
    assert!(store.get_by_uid::<VirtualService>("uid-2").is_some());
    assert_eq!(store.len::<VirtualService>(), 1);
}

#[test]
fn interned_keys_share_allocations() {
    let pool = StringPool::shared();
    let store = Store::new(Some(pool.clone()));
    store.set(mk_vs("team", "a", None));
    store.set(mk_listener("team", "http", 8080));

    let ids = store
        .list::<VirtualService>()
        .into_keys()
        .chain(store.list::<Listener>().into_keys())
        .collect::<Vec<_>>();
    assert!(Arc::ptr_eq(&ids[0].namespace, &ids[1].namespace));
    assert!(pool.stats().hits > 0);
}

#[test]
fn copy_is_isolated() {
    let store = Store::default();
    store.set(mk_vs("ns", "a", None));
    store
        .status()
        .set(mk_id("ns", "a"), VsStatus::invalid("broken"));

    let copy = store.copy();
    copy.set(mk_vs("ns", "b", None));
    copy.delete::<VirtualService>(&mk_id("ns", "a"));
    copy.status().set(mk_id("ns", "a"), VsStatus::valid());

    assert_eq!(store.len::<VirtualService>(), 1);
    assert!(store.exists::<VirtualService>(&mk_id("ns", "a")));
    assert!(store.status().get(&mk_id("ns", "a")).invalid);
    assert_eq!(copy.len::<VirtualService>(), 1);
    assert!(copy.exists::<VirtualService>(&mk_id("ns", "b")));
}

#[test]
fn copies_never_hold_statuses_ahead_of_their_objects() {
    let store = Arc::new(Store::default());
    let writer = {
        let store = store.clone();
        std::thread::spawn(move || {
            for i in 0..500 {
                let name = format!("vs-{i}");
                store.set(mk_vs("ns", &name, None));
                store.status().set(mk_id("ns", &name), VsStatus::valid());
            }
        })
    };

    while !writer.is_finished() {
        let copy = store.copy();
        for (id, _) in copy.status().snapshot_all() {
            assert!(copy.exists::<VirtualService>(&id), "{id} has a status but no object");
        }
    }
    writer.join().unwrap();
}

#[test]
fn deletes_release_interned_strings() {
    let pool = StringPool::shared();
    let store = Store::new(Some(pool.clone()));
    store.set(mk_vs("team", "keep", None));

    for i in 0..2_000 {
        let name = format!("churn-{i}");
        store.set(mk_vs("team", &name, None));
        store.delete::<VirtualService>(&mk_id("team", &name));
    }

    assert!(pool.len() <= 3 + POOL_SLACK + 2, "pool grew to {}", pool.len());
    assert!(store.exists::<VirtualService>(&mk_id("team", "keep")));
    assert!(store.get_by_uid::<VirtualService>("uid-team-keep").is_some());
}

#[test]
fn dependency_epoch_tracks_dependencies() {
    let store = Store::default();
    let e0 = store.dependency_epoch();
    store.set(mk_vs("ns", "a", None));
    assert_eq!(store.dependency_epoch(), e0, "virtual services are not dependencies");

    store.set(mk_cluster("ns", "c", "backend"));
    let e1 = store.dependency_epoch();
    assert_ne!(e1, e0);

    store.delete::<Cluster>(&mk_id("ns", "c"));
    assert_ne!(store.dependency_epoch(), e1);

    let copy = store.copy();
    assert_eq!(copy.dependency_epoch(), store.dependency_epoch());
    copy.set(mk_cluster("ns", "c", "backend"));
    assert_ne!(copy.dependency_epoch(), store.dependency_epoch());
}

#[test]
fn indexes_virtual_services_by_template() {
    let store = Store::default();
    store.set(mk_vs("ns", "a", Some("tpl")));
    store.set(mk_vs("ns", "b", Some("tpl")));
    store.set(mk_vs("other", "c", Some("tpl")));

    let mut vss = store.virtual_services_by_template(&mk_id("ns", "tpl"));
    vss.sort();
    assert_eq!(vss, vec![mk_id("ns", "a"), mk_id("ns", "b")]);

    // Dropping the template reference removes the entry.
    store.set(mk_vs("ns", "a", None));
    assert_eq!(
        store.virtual_services_by_template(&mk_id("ns", "tpl")),
        vec![mk_id("ns", "b")]
    );
    store.delete::<VirtualService>(&mk_id("ns", "b"));
    assert!(store
        .virtual_services_by_template(&mk_id("ns", "tpl"))
        .is_empty());
}

#[test]
fn spec_cluster_names() {
    let store = Store::default();
    store.set(mk_cluster("ns", "one", "backend"));
    store.set(mk_cluster("ns", "two", "backend"));
    let found = store.get_spec_cluster("backend").unwrap();
    assert_eq!(found.metadata.name.as_deref(), Some("two"));

    // Deleting the displaced object leaves the current owner in place.
    store.delete::<Cluster>(&mk_id("ns", "one"));
    assert!(store.get_spec_cluster("backend").is_some());
    store.delete::<Cluster>(&mk_id("ns", "two"));
    assert!(store.get_spec_cluster("backend").is_none());

    // Renaming the Envoy cluster moves the entry.
    store.set(mk_cluster("ns", "three", "old"));
    store.set(mk_cluster("ns", "three", "new"));
    assert!(store.get_spec_cluster("old").is_none());
    assert!(store.get_spec_cluster("new").is_some());
}

#[test]
fn listener_addresses() {
    let store = Store::default();
    store.set(mk_listener("ns", "b", 443));
    store.set(mk_listener("ns", "a", 443));
    store.set(mk_listener("ns", "c", 80));
    // Incomplete addresses are not indexed.
    store.set(Listener::new(
        "ns",
        "d",
        json!({ "name": "d", "address": { "socket_address": { "address": "0.0.0.0" } } })
            .as_object()
            .cloned()
            .unwrap(),
    ));

    assert_eq!(
        store.listener_addresses(),
        btreemap! {
            "0.0.0.0:443".to_string() => mk_id("ns", "a"),
            "0.0.0.0:80".to_string() => mk_id("ns", "c"),
        }
    );
    assert_eq!(
        store.duplicate_listener_address(),
        Some(DuplicateAddress {
            address: "0.0.0.0:443".to_string(),
            first: mk_id("ns", "a"),
            second: mk_id("ns", "b"),
        })
    );

    store.delete::<Listener>(&mk_id("ns", "a"));
    assert_eq!(store.duplicate_listener_address(), None);
    assert_eq!(
        store.listener_addresses().get("0.0.0.0:443"),
        Some(&mk_id("ns", "b"))
    );
}

#[rstest]
#[case::exact_valid(Some(Cert::Valid), Some(Cert::Valid), Some(("exact", Validity::Valid, None)))]
#[case::exact_expired(
    Some(Cert::Expired),
    Some(Cert::Valid),
    Some(("wildcard", Validity::Valid, Some(Fallback::Expired)))
)]
#[case::exact_unknown(
    Some(Cert::Garbage),
    Some(Cert::Valid),
    Some(("wildcard", Validity::Valid, Some(Fallback::Unknown)))
)]
#[case::both_expired(
    Some(Cert::Expired),
    Some(Cert::Expired),
    Some(("exact", Validity::Expired, None))
)]
#[case::exact_unknown_wildcard_expired(
    Some(Cert::Garbage),
    Some(Cert::Expired),
    Some(("exact", Validity::Unknown, None))
)]
#[case::wildcard_only(
    None,
    Some(Cert::Expired),
    Some(("wildcard", Validity::Expired, Some(Fallback::NotFound)))
)]
#[case::nothing(None, None, None)]
fn wildcard_fallback(
    #[case] exact: Option<Cert>,
    #[case] wildcard: Option<Cert>,
    #[case] expected: Option<(&str, Validity, Option<Fallback>)>,
) {
    let store = Store::default();
    if let Some(cert) = exact {
        store.set(mk_secret("ns", "exact", "api.example.com", cert.pem()));
    }
    if let Some(cert) = wildcard {
        store.set(mk_secret("ns", "wildcard", "*.example.com", cert.pem()));
    }

    let found = store.resolve_domain_secret("api.example.com", "ns", Utc::now());
    let expected = expected.map(|(name, validity, fallback)| SecretLookup {
        secret: mk_id("ns", name),
        validity,
        via_wildcard: name == "wildcard",
        fallback,
    });
    assert_eq!(found, expected);
}

#[test]
fn only_the_immediate_wildcard_is_tried() {
    let store = Store::default();
    store.set(mk_secret("ns", "w", "*.example.com", Cert::Valid.pem()));
    assert!(store
        .resolve_domain_secret("a.b.example.com", "ns", Utc::now())
        .is_none());
    assert!(store
        .resolve_domain_secret("b.example.com", "ns", Utc::now())
        .is_some());
}

#[test]
fn validity_ranks_above_namespace() {
    let store = Store::default();
    store.set(mk_secret("mine", "old", "api.example.com", Cert::Expired.pem()));
    store.set(mk_secret("theirs", "new", "api.example.com", Cert::Valid.pem()));
    let found = store
        .resolve_domain_secret("api.example.com", "mine", Utc::now())
        .unwrap();
    assert_eq!(found.secret, mk_id("theirs", "new"));

    store.set(mk_secret("mine", "new", "api.example.com", Cert::Valid.pem()));
    let found = store
        .resolve_domain_secret("api.example.com", "mine", Utc::now())
        .unwrap();
    assert_eq!(found.secret, mk_id("mine", "new"));
}

#[test]
fn next_secret_expiry() {
    let store = Store::default();
    let now = Utc::now();
    let soon = now + Duration::hours(1);
    let later = now + Duration::days(10);
    assert_eq!(store.next_secret_expiry(now), None);

    store.set(mk_secret("ns", "a", "a.com,b.com", mk_cert_pem(soon)));
    store.set(mk_secret("ns", "b", "c.com", mk_cert_pem(later)));
    let next = store.next_secret_expiry(now).unwrap();
    assert_eq!(next.timestamp(), soon.timestamp());
    assert_eq!(
        store.next_secret_expiry(soon + Duration::minutes(1)).unwrap().timestamp(),
        later.timestamp()
    );

    // Both domains of the replaced certificate are forgotten.
    store.set(mk_secret("ns", "a", "a.com,b.com", mk_cert_pem(later)));
    assert_eq!(store.next_secret_expiry(now).unwrap().timestamp(), later.timestamp());
    store.delete::<Secret>(&mk_id("ns", "a"));
    store.delete::<Secret>(&mk_id("ns", "b"));
    assert_eq!(store.next_secret_expiry(now), None);
}

#[test]
fn secret_index_follows_annotations() {
    let store = Store::default();
    store.set(mk_secret("ns", "s", "a.example.com,b.example.com", Cert::Valid.pem()));
    assert!(store
        .resolve_domain_secret("b.example.com", "ns", Utc::now())
        .is_some());

    store.set(mk_secret("ns", "s", "a.example.com", Cert::Valid.pem()));
    assert!(store
        .resolve_domain_secret("b.example.com", "ns", Utc::now())
        .is_none());

    store.delete::<Secret>(&mk_id("ns", "s"));
    assert!(store
        .resolve_domain_secret("a.example.com", "ns", Utc::now())
        .is_none());
}

#[test]
fn not_after_uses_earliest_certificate() {
    let soon = Utc::now() + Duration::days(2);
    let later = Utc::now() + Duration::days(90);
    let chain = format!("{}{}", mk_cert_pem(later), mk_cert_pem(soon));
    let secret = mk_secret("ns", "s", "a.example.com", chain);
    assert_eq!(not_after(&secret).map(|t| t.timestamp()), Some(soon.timestamp()));

    let garbage = mk_secret("ns", "g", "a.example.com", Cert::Garbage.pem());
    assert_eq!(not_after(&garbage), None);
}

#[test]
fn orphaned_statuses_are_not_joined() {
    let store = Store::default();
    store.set(mk_vs("ns", "a", None));
    store
        .status()
        .set(mk_id("ns", "gone"), VsStatus::invalid("stale"));
    store.status().set(mk_id("ns", "a"), VsStatus::invalid("bad"));

    assert!(store.virtual_service_with_status(&mk_id("ns", "gone")).is_none());
    let (_, status) = store.virtual_service_with_status(&mk_id("ns", "a")).unwrap();
    assert_eq!(status, VsStatus::invalid("bad"));
    assert_eq!(store.status().get(&mk_id("ns", "never")), VsStatus::default());
}

#[test]
fn node_domains_round_trip() {
    let store = Store::default();
    let mut index = NodeDomains::default();
    index.insert(
        "node-a".to_string(),
        ["a.example.com".to_string()].into_iter().collect(),
    );
    store.replace_node_domains(index.clone());
    assert_eq!(store.node_domains(), index);
    assert!(store.domains_for_node("node-b").is_none());
    assert!(store
        .domains_for_node("node-a")
        .unwrap()
        .contains("a.example.com"));
}

#[test]
fn dump_lists_keys_and_indices() {
    let store = Store::default();
    store.set(mk_vs("ns", "a", Some("tpl")));
    store.set(mk_cluster("ns", "c", "backend"));
    store.status().set(mk_id("ns", "a"), VsStatus::invalid("bad"));

    let dump = store.dump();
    assert_eq!(dump["virtualServices"], json!(["ns/a"]));
    assert_eq!(dump["specClusters"], json!({ "backend": "ns/c" }));
    assert_eq!(dump["templateVirtualServices"], json!({ "ns/tpl": ["ns/a"] }));
    assert_eq!(
        dump["statuses"],
        json!({ "ns/a": { "invalid": true, "message": "bad" } })
    );
}

#[test]
fn metrics_encode() {
    let store = Store::shared(Some(StringPool::shared()));
    store.set(mk_vs("ns", "a", None));
    let mut reg = prometheus_client::registry::Registry::default();
    metrics::register(&mut reg, store);
    let mut out = String::new();
    prometheus_client::encoding::text::encode(&mut out, &reg).unwrap();
    assert!(out.contains("store_entities{kind=\"virtual_service\"} 1"), "{out}");
    assert!(out.contains("string_pool_size"), "{out}");
}

// === load ===

#[derive(Default)]
struct MockSource {
    objects: std::collections::HashMap<String, Vec<Value>>,
    fail: bool,
}

#[async_trait::async_trait]
impl Source for MockSource {
    async fn list<K>(&self) -> anyhow::Result<Vec<K>>
    where
        K: StoreKind + serde::de::DeserializeOwned,
    {
        anyhow::ensure!(!self.fail, "connection refused");
        self.objects
            .get(K::kind(&()).as_ref())
            .into_iter()
            .flatten()
            .map(|v| serde_json::from_value(v.clone()).map_err(Into::into))
            .collect()
    }
}

#[tokio::test]
async fn load_replaces_contents() {
    let store = Store::default();
    store.set(mk_vs("ns", "stale", None));
    let mut index = NodeDomains::default();
    index.insert("node".to_string(), Default::default());
    store.replace_node_domains(index);

    let source = MockSource {
        objects: [
            (
                "VirtualService".to_string(),
                vec![serde_json::to_value(mk_vs("ns", "fresh", None)).unwrap()],
            ),
            (
                "Listener".to_string(),
                vec![serde_json::to_value(mk_listener("ns", "l", 80)).unwrap()],
            ),
        ]
        .into_iter()
        .collect(),
        fail: false,
    };
    store.load(&source).await.unwrap();

    assert!(!store.exists::<VirtualService>(&mk_id("ns", "stale")));
    assert!(store.exists::<VirtualService>(&mk_id("ns", "fresh")));
    assert_eq!(store.listener_addresses().len(), 1);
    assert!(store.domains_for_node("node").is_some(), "node domains survive a load");
}

#[tokio::test]
async fn failed_load_leaves_store_unchanged() {
    let store = Store::default();
    store.set(mk_vs("ns", "a", None));
    let source = MockSource {
        fail: true,
        ..Default::default()
    };
    let err = store.load(&source).await.unwrap_err();
    assert!(format!("{err:#}").contains("connection refused"));
    assert!(store.exists::<VirtualService>(&mk_id("ns", "a")));
}

// === properties ===

proptest! {
    #[test]
    fn upsert_is_idempotent(names in proptest::collection::vec("[a-z]{1,4}", 1..12)) {
        let once = Store::default();
        let twice = Store::default();
        for name in &names {
            once.set(mk_cluster("ns", name, name));
            twice.set(mk_cluster("ns", name, name));
            twice.set(mk_cluster("ns", name, name));
        }
        prop_assert_eq!(
            once.list::<Cluster>().keys().cloned().collect::<Vec<_>>(),
            twice.list::<Cluster>().keys().cloned().collect::<Vec<_>>()
        );
        let mut dump_once = once.dump();
        let mut dump_twice = twice.dump();
        dump_once["statuses"] = Value::Null;
        dump_twice["statuses"] = Value::Null;
        prop_assert_eq!(dump_once, dump_twice);
    }

    #[test]
    fn copies_do_not_observe_later_writes(
        before in proptest::collection::btree_set("[a-z]{1,4}", 0..8),
        after in proptest::collection::btree_set("[a-z]{1,4}", 1..8),
    ) {
        let store = Store::default();
        for name in &before {
            store.set(mk_vs("ns", name, None));
        }
        let copy = store.copy();
        for name in &after {
            store.set(mk_vs("ns", &format!("{name}-new"), None));
        }
        prop_assert_eq!(copy.len::<VirtualService>(), before.len());
        prop_assert_eq!(
            copy.list::<VirtualService>().keys().map(|id| id.name.to_string()).collect::<Vec<_>>(),
            before.iter().cloned().collect::<Vec<_>>()
        );
    }

    #[test]
    fn resolution_is_order_independent(order in Just(vec![0usize, 1, 2]).prop_shuffle()) {
        let secrets = [
            mk_secret("b", "s", "x.example.com", Cert::Valid.pem()),
            mk_secret("a", "s", "x.example.com", Cert::Valid.pem()),
            mk_secret("c", "s", "x.example.com", Cert::Expired.pem()),
        ];
        let store = Store::default();
        for i in order {
            store.set(secrets[i].clone());
        }
        let found = store.resolve_domain_secret("x.example.com", "z", Utc::now()).unwrap();
        prop_assert_eq!(found.secret, mk_id("a", "s"));
    }
}
