//! Indexes TLS secrets by the domains they serve.

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use envoy_xds_controller_core::ResourceId;
use envoy_xds_controller_k8s_api::{meta, Secret};
use openssl::{asn1::Asn1Time, x509::X509};
use serde::Serialize;
use std::collections::BTreeMap;

const TLS_CERT_KEY: &str = "tls.crt";
const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Domain to the secrets annotated with it, each with its certificate expiry, if known.
#[derive(Clone, Debug, Default)]
pub(crate) struct DomainSecrets {
    by_domain: HashMap<String, HashMap<ResourceId, Option<DateTime<Utc>>>>,
    /// Every known expiry in `by_domain`, with the number of entries that carry it.
    expiries: BTreeMap<DateTime<Utc>, usize>,
}

/// A certificate's standing at lookup time. Ordered from least to most preferred.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Expired,
    /// The certificate could not be parsed.
    Unknown,
    Valid,
}

/// Why an exact-domain secret was passed over in favor of a wildcard.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    NotFound,
    Expired,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretLookup {
    pub secret: ResourceId,
    pub validity: Validity,
    pub via_wildcard: bool,
    pub fallback: Option<Fallback>,
}

// === impl DomainSecrets ===

impl DomainSecrets {
    pub(crate) fn add(&mut self, id: &ResourceId, secret: &Secret) {
        let expiry = not_after(secret);
        for domain in meta::secret_domains(&secret.metadata) {
            let prev = self
                .by_domain
                .entry(domain)
                .or_default()
                .insert(id.clone(), expiry);
            self.forget_expiry(prev.flatten());
            if let Some(t) = expiry {
                *self.expiries.entry(t).or_default() += 1;
            }
        }
    }

    pub(crate) fn remove(&mut self, id: &ResourceId, secret: &Secret) {
        for domain in meta::secret_domains(&secret.metadata) {
            if let Some(entries) = self.by_domain.get_mut(&domain) {
                let prev = entries.remove(id);
                if entries.is_empty() {
                    self.by_domain.remove(&domain);
                }
                self.forget_expiry(prev.flatten());
            }
        }
    }

    fn forget_expiry(&mut self, expiry: Option<DateTime<Utc>>) {
        let Some(t) = expiry else { return };
        if let Some(n) = self.expiries.get_mut(&t) {
            *n -= 1;
            if *n == 0 {
                self.expiries.remove(&t);
            }
        }
    }

    /// The earliest certificate expiry after `now`. Lookups return the same results until then.
    pub(crate) fn next_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        use std::ops::Bound::{Excluded, Unbounded};
        self.expiries
            .range((Excluded(now), Unbounded))
            .next()
            .map(|(t, _)| *t)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_domain.len()
    }

    /// Ranks the secrets annotated with exactly `domain`: valid before unknown before expired,
    /// then secrets in `preferred_ns`, then by namespace and name.
    fn best(
        &self,
        domain: &str,
        preferred_ns: &str,
        now: DateTime<Utc>,
    ) -> Option<(ResourceId, Validity)> {
        self.by_domain
            .get(domain)?
            .iter()
            .map(|(id, expiry)| (id, validity(*expiry, now)))
            .min_by(|(a, va), (b, vb)| {
                vb.cmp(va)
                    .then_with(|| {
                        let a_pref = &*a.namespace == preferred_ns;
                        let b_pref = &*b.namespace == preferred_ns;
                        b_pref.cmp(&a_pref)
                    })
                    .then_with(|| a.cmp(b))
            })
            .map(|(id, v)| (id.clone(), v))
    }

    pub(crate) fn resolve(
        &self,
        domain: &str,
        preferred_ns: &str,
        now: DateTime<Utc>,
    ) -> Option<SecretLookup> {
        let exact = self.best(domain, preferred_ns, now);
        if let Some((secret, Validity::Valid)) = &exact {
            return Some(SecretLookup {
                secret: secret.clone(),
                validity: Validity::Valid,
                via_wildcard: false,
                fallback: None,
            });
        }

        let wildcard = wildcard_of(domain).and_then(|w| self.best(&w, preferred_ns, now));
        match (exact, wildcard) {
            (None, Some((secret, validity))) => Some(SecretLookup {
                secret,
                validity,
                via_wildcard: true,
                fallback: Some(Fallback::NotFound),
            }),
            (Some((_, exact_validity)), Some((secret, Validity::Valid))) => Some(SecretLookup {
                secret,
                validity: Validity::Valid,
                via_wildcard: true,
                fallback: Some(match exact_validity {
                    Validity::Unknown => Fallback::Unknown,
                    _ => Fallback::Expired,
                }),
            }),
            (Some((secret, validity)), _) => Some(SecretLookup {
                secret,
                validity,
                via_wildcard: false,
                fallback: None,
            }),
            (None, None) => None,
        }
    }

    pub(crate) fn dump(&self) -> BTreeMap<String, Vec<String>> {
        self.by_domain
            .iter()
            .map(|(domain, entries)| {
                let mut ids = entries.keys().map(ToString::to_string).collect::<Vec<_>>();
                ids.sort();
                (domain.clone(), ids)
            })
            .collect()
    }
}

fn validity(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Validity {
    match expiry {
        None => Validity::Unknown,
        Some(t) if t > now => Validity::Valid,
        Some(_) => Validity::Expired,
    }
}

/// The immediate wildcard covering `domain`: `*.example.com` for `api.example.com`.
fn wildcard_of(domain: &str) -> Option<String> {
    if domain.starts_with("*.") {
        return None;
    }
    let (_, rest) = domain.split_once('.')?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("*.{rest}"))
}

/// The earliest expiry among the certificates in the secret's `tls.crt`.
///
/// Blocks that fail to parse are skipped. Returns `None` if no certificate could be read.
pub fn not_after(secret: &Secret) -> Option<DateTime<Utc>> {
    let data = secret.data.as_ref()?.get(TLS_CERT_KEY)?;
    let pem = std::str::from_utf8(&data.0).ok()?;
    let epoch = Asn1Time::from_unix(0).ok()?;

    let mut min: Option<DateTime<Utc>> = None;
    let mut rest = pem;
    while let Some(start) = rest.find(PEM_BEGIN) {
        let Some(len) = rest[start..].find(PEM_END) else {
            break;
        };
        let end = start + len + PEM_END.len();
        let block = &rest[start..end];
        rest = &rest[end..];

        let expiry = X509::from_pem(block.as_bytes()).ok().and_then(|cert| {
            let diff = epoch.diff(cert.not_after()).ok()?;
            let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
            DateTime::from_timestamp(secs, 0)
        });
        match expiry {
            Some(t) => min = Some(min.map_or(t, |m| m.min(t))),
            None => tracing::debug!(
                secret = ?secret.metadata.name,
                "failed to parse certificate block"
            ),
        }
    }
    min
}
