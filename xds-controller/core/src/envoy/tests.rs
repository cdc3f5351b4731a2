use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn listener_accepts_both_spellings() {
    let snake: Listener = from_value(&json!({
        "name": "https",
        "address": { "socket_address": { "address": "0.0.0.0", "port_value": 443 } },
        "listener_filters": [{
            "name": "tls",
            "typed_config": { "@type": well_known::TLS_INSPECTOR_TYPE },
        }],
        "per_connection_buffer_limit_bytes": 32768,
    }))
    .unwrap();
    let camel: Listener = from_value(&json!({
        "name": "https",
        "address": { "socketAddress": { "address": "0.0.0.0", "portValue": 443 } },
        "listenerFilters": [{
            "name": "tls",
            "typedConfig": { "@type": well_known::TLS_INSPECTOR_TYPE },
        }],
        "per_connection_buffer_limit_bytes": 32768,
    }))
    .unwrap();
    assert_eq!(snake, camel);
    assert!(snake.has_tls_inspector());
    assert!(!snake.has_tcp_proxy());
    assert_eq!(snake.address_key().as_deref(), Some("0.0.0.0:443"));
    assert_eq!(snake.port(), Some(443));

    // Unmodeled fields survive encoding.
    let encoded = serde_json::to_value(&snake).unwrap();
    assert_eq!(encoded["per_connection_buffer_limit_bytes"], json!(32768));
}

#[test]
fn incomplete_addresses_have_no_key() {
    let no_port: Listener = from_value(&json!({
        "address": { "socket_address": { "address": "0.0.0.0" } },
    }))
    .unwrap();
    assert_eq!(no_port.address_key(), None);

    let no_host: Listener = from_value(&json!({
        "address": { "socket_address": { "port_value": 80 } },
    }))
    .unwrap();
    assert_eq!(no_host.address_key(), None);
    assert_eq!(Listener::default().address_key(), None);
}

#[test]
fn any_pack_unpack() {
    let tcp = TcpProxy {
        stat_prefix: "db".to_string(),
        cluster: Some("postgres".to_string()),
        ..Default::default()
    };
    let any = Any::pack(well_known::TCP_PROXY_TYPE, &tcp).unwrap();
    assert!(any.is(well_known::TCP_PROXY_TYPE));
    assert_eq!(
        serde_json::to_value(&any).unwrap(),
        json!({
            "@type": well_known::TCP_PROXY_TYPE,
            "stat_prefix": "db",
            "cluster": "postgres",
        })
    );
    let back: TcpProxy = any.unpack(well_known::TCP_PROXY_TYPE).unwrap();
    assert_eq!(back, tcp);
    assert!(any.unpack::<TcpProxy>(well_known::ROUTER_TYPE).is_err());
}

#[test]
fn route_validation() {
    let ok: Route = from_value(&json!({
        "match": { "prefix": "/" },
        "route": { "cluster": "backend" },
    }))
    .unwrap();
    ok.validate().unwrap();
    assert!(ok.is_root());

    let no_action: Route = from_value(&json!({ "match": { "prefix": "/api" } })).unwrap();
    assert!(no_action.validate().is_err());

    let no_path: Route = from_value(&json!({
        "match": { "headers": [] },
        "route": { "cluster": "backend" },
    }))
    .unwrap();
    assert!(no_path.validate().is_err());

    let no_cluster: Route = from_value(&json!({
        "match": { "path": "/x" },
        "route": { "timeout": "5s" },
    }))
    .unwrap();
    assert!(no_cluster.validate().is_err());
}

#[test]
fn route_clusters() {
    let route: Route = from_value(&json!({
        "match": { "path": "/" },
        "route": {
            "cluster": "a",
            "weighted_clusters": { "clusters": [{ "name": "b", "weight": 90 }, { "name": "c", "weight": 10 }] },
        },
    }))
    .unwrap();
    assert_eq!(
        route.clusters(),
        vec![
            ClusterRef::Direct("a"),
            ClusterRef::Weighted("b"),
            ClusterRef::Weighted("c"),
        ]
    );

    let direct: Route = from_value(&json!({
        "match": { "prefix": "/" },
        "direct_response": { "status": 421 },
    }))
    .unwrap();
    assert!(direct.clusters().is_empty());
    direct.validate().unwrap();
}

#[test]
fn virtual_host_requires_domains_and_routes() {
    let vh = VirtualHost {
        name: "ns/vs".to_string(),
        domains: vec!["a.com".to_string()],
        ..Default::default()
    };
    assert!(vh.validate().is_err());
}

#[test]
fn rbac_actions() {
    assert_eq!("DENY".parse::<RbacAction>().unwrap(), RbacAction::Deny);
    assert_eq!(
        "deny".parse::<RbacAction>().unwrap_err().to_string(),
        "invalid rbac action deny"
    );
    let rules: RbacRules = from_value(&json!({
        "action": "LOG",
        "policies": { "b": { "permissions": [{ "any": true }], "principals": [{ "any": true }] } },
    }))
    .unwrap();
    assert_eq!(rules.action, RbacAction::Log);
    rules.policies["b"].validate().unwrap();
    assert!(RbacPolicy::default().validate().is_err());
}

#[test]
fn sds_tls_context() {
    let ctx = DownstreamTlsContext::sds("ns/cert");
    assert_eq!(ctx.secret_names().collect::<Vec<_>>(), vec!["ns/cert"]);
    assert_eq!(
        serde_json::to_value(&ctx).unwrap(),
        json!({
            "common_tls_context": {
                "tls_certificate_sds_secret_configs": [{
                    "name": "ns/cert",
                    "sds_config": { "ads": {}, "resource_api_version": "V3" },
                }],
                "alpn_protocols": ["h2", "http/1.1"],
            },
        })
    );
}
