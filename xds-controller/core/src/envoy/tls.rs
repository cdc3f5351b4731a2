use super::{well_known, ConfigSource, DataSource, Extra, Validate};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// An SDS secret holding a certificate chain and its private key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "tlsCertificate", skip_serializing_if = "Option::is_none")]
    pub tls_certificate: Option<TlsCertificate>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsCertificate {
    #[serde(
        default,
        alias = "certificateChain",
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_chain: Option<DataSource>,
    #[serde(default, alias = "privateKey", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<DataSource>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DownstreamTlsContext {
    #[serde(
        default,
        alias = "commonTlsContext",
        skip_serializing_if = "Option::is_none"
    )]
    pub common_tls_context: Option<CommonTlsContext>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonTlsContext {
    #[serde(
        default,
        alias = "tlsCertificateSdsSecretConfigs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tls_certificate_sds_secret_configs: Vec<SdsSecretConfig>,
    #[serde(default, alias = "alpnProtocols", skip_serializing_if = "Vec::is_empty")]
    pub alpn_protocols: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SdsSecretConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "sdsConfig", skip_serializing_if = "Option::is_none")]
    pub sds_config: Option<ConfigSource>,
    #[serde(flatten)]
    pub extra: Extra,
}

// === impl Secret ===

impl Secret {
    pub fn tls(name: impl Into<String>, chain: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tls_certificate: Some(TlsCertificate {
                certificate_chain: Some(DataSource::inline(chain)),
                private_key: Some(DataSource::inline(key)),
                extra: Extra::default(),
            }),
            extra: Extra::default(),
        }
    }
}

impl Validate for Secret {
    fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "secret name is empty");
        Ok(())
    }
}

// === impl DownstreamTlsContext ===

impl DownstreamTlsContext {
    /// A server context whose certificate is fetched over SDS by name.
    pub fn sds(secret_name: impl Into<String>) -> Self {
        Self {
            common_tls_context: Some(CommonTlsContext {
                tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                    name: secret_name.into(),
                    sds_config: Some(ConfigSource::ads()),
                    extra: Extra::default(),
                }],
                alpn_protocols: well_known::ALPN_PROTOCOLS
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
                extra: Extra::default(),
            }),
            extra: Extra::default(),
        }
    }

    /// The SDS secret names the context refers to.
    pub fn secret_names(&self) -> impl Iterator<Item = &str> {
        self.common_tls_context
            .iter()
            .flat_map(|c| c.tls_certificate_sds_secret_configs.iter())
            .map(|s| s.name.as_str())
    }
}
