use super::{well_known, Address, Extra, Filter, ListenerFilter, TransportSocket, Validate};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, alias = "filterChains", skip_serializing_if = "Vec::is_empty")]
    pub filter_chains: Vec<FilterChain>,
    #[serde(
        default,
        alias = "listenerFilters",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub listener_filters: Vec<ListenerFilter>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterChain {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        default,
        alias = "filterChainMatch",
        skip_serializing_if = "Option::is_none"
    )]
    pub filter_chain_match: Option<FilterChainMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(
        default,
        alias = "transportSocket",
        skip_serializing_if = "Option::is_none"
    )]
    pub transport_socket: Option<TransportSocket>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterChainMatch {
    #[serde(default, alias = "serverNames", skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

// === impl Listener ===

impl Listener {
    /// The socket address, if both its host and port are set.
    pub fn socket_address(&self) -> Option<(&str, u32)> {
        let sa = self.address.as_ref()?.socket_address.as_ref()?;
        let port = sa.port_value?;
        if sa.address.is_empty() {
            return None;
        }
        Some((&sa.address, port))
    }

    /// The `host:port` form of the socket address.
    pub fn address_key(&self) -> Option<String> {
        self.socket_address()
            .map(|(host, port)| format!("{host}:{port}"))
    }

    pub fn port(&self) -> Option<u32> {
        self.address.as_ref()?.socket_address.as_ref()?.port_value
    }

    pub fn has_tls_inspector(&self) -> bool {
        self.listener_filters
            .iter()
            .any(|f| f.name == well_known::TLS_INSPECTOR || f.is(well_known::TLS_INSPECTOR_TYPE))
    }

    pub fn has_tcp_proxy(&self) -> bool {
        self.filter_chains.iter().any(|fc| {
            fc.filters
                .iter()
                .any(|f| f.name == well_known::TCP_PROXY || f.is(well_known::TCP_PROXY_TYPE))
        })
    }
}

impl Validate for Listener {
    fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "listener name is empty");
        ensure!(
            self.address.is_some(),
            "listener {} has no address",
            self.name
        );
        for fc in &self.filter_chains {
            fc.validate()?;
        }
        Ok(())
    }
}

// === impl FilterChain ===

impl Validate for FilterChain {
    fn validate(&self) -> Result<()> {
        for f in &self.filters {
            ensure!(!f.name.is_empty(), "filter chain {}: filter name is empty", self.name);
        }
        if let Some(ts) = &self.transport_socket {
            ensure!(
                !ts.name.is_empty(),
                "filter chain {}: transport socket name is empty",
                self.name
            );
        }
        Ok(())
    }
}
