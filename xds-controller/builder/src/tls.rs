use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use envoy_xds_controller_core::{envoy, ResourceId};
use envoy_xds_controller_k8s_api::{ResourceRef, Secret, TlsConfig};
use envoy_xds_controller_k8s_store::Store;
use std::collections::BTreeMap;

/// Domains served with the same certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SecretGroup {
    pub(crate) secret: ResourceId,
    pub(crate) domains: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Source<'c> {
    SecretRef(&'c ResourceRef),
    AutoDiscovery,
}

fn source(tls: &TlsConfig) -> Result<Source<'_>> {
    let auto = tls.auto_discovery == Some(true);
    match (&tls.secret_ref, auto) {
        (Some(_), true) => bail!("multiple TLS configuration types specified (only one allowed)"),
        (Some(r), false) => Ok(Source::SecretRef(r)),
        (None, true) => Ok(Source::AutoDiscovery),
        (None, false) => bail!("no TLS configuration specified"),
    }
}

/// Groups the virtual host's domains by the secret that serves them, ordered by secret.
pub(crate) fn secret_groups(
    tls: &TlsConfig,
    domains: &[String],
    vs: &ResourceId,
    store: &Store,
    now: DateTime<Utc>,
) -> Result<Vec<SecretGroup>> {
    match source(tls)? {
        Source::SecretRef(r) => Ok(vec![SecretGroup {
            secret: r.id(&vs.namespace),
            domains: domains.to_vec(),
        }]),
        Source::AutoDiscovery => {
            let mut groups = BTreeMap::<ResourceId, Vec<String>>::new();
            for domain in domains {
                let found = store
                    .resolve_domain_secret(domain, &vs.namespace, now)
                    .ok_or_else(|| anyhow!("can't find secret for domain {domain}"))?;
                if found.via_wildcard {
                    tracing::debug!(
                        %vs,
                        %domain,
                        secret = %found.secret,
                        fallback = ?found.fallback,
                        "using wildcard certificate"
                    );
                }
                groups.entry(found.secret).or_default().push(domain.clone());
            }
            Ok(groups
                .into_iter()
                .map(|(secret, domains)| SecretGroup { secret, domains })
                .collect())
        }
    }
}

/// Builds SDS secrets holding the certificate and key of each Kubernetes secret.
pub(crate) fn build_secrets(ids: &[ResourceId], store: &Store) -> Result<Vec<envoy::Secret>> {
    ids.iter()
        .map(|id| {
            let secret = store
                .get::<Secret>(id)
                .ok_or_else(|| anyhow!("Kubernetes secret {id} not found"))?;
            let chain = data(&secret, "tls.crt")
                .with_context(|| format!("certificate data not found in secret {id}"))?;
            let key = data(&secret, "tls.key")
                .with_context(|| format!("private key data not found in secret {id}"))?;
            Ok(envoy::Secret::tls(id.to_string(), chain, key))
        })
        .collect()
}

fn data(secret: &Secret, key: &str) -> Result<String> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .filter(|b| !b.0.is_empty())
        .ok_or_else(|| anyhow!("{key} is missing"))?;
    Ok(String::from_utf8(bytes.0.clone())?)
}
