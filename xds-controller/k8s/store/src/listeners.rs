use crate::Table;
use ahash::AHashMap as HashMap;
use envoy_xds_controller_core::ResourceId;
use envoy_xds_controller_k8s_api::Listener;
use serde::Serialize;

/// Two listeners bound to the same address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DuplicateAddress {
    pub address: String,
    pub first: ResourceId,
    pub second: ResourceId,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ListenerAddrs {
    pub(crate) by_addr: HashMap<String, ResourceId>,
    pub(crate) duplicate: Option<DuplicateAddress>,
}

// === impl ListenerAddrs ===

impl ListenerAddrs {
    /// Indexes listeners by `host:port`, visiting them in key order so that the first claimant
    /// of an address does not depend on hash order.
    ///
    /// Listeners that do not parse or lack a complete address are not indexed.
    pub(crate) fn build(listeners: &Table<Listener>) -> Self {
        let mut sorted = listeners.iter().collect::<Vec<_>>();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut addrs = Self::default();
        for (id, listener) in sorted {
            let address = match listener.parse() {
                Ok(l) => match l.address_key() {
                    Some(a) => a,
                    None => continue,
                },
                Err(error) => {
                    tracing::debug!(listener = %id, %error, "skipping unparseable listener");
                    continue;
                }
            };
            match addrs.by_addr.get(&address) {
                Some(first) => {
                    if addrs.duplicate.is_none() {
                        addrs.duplicate = Some(DuplicateAddress {
                            address,
                            first: first.clone(),
                            second: id.clone(),
                        });
                    }
                }
                None => {
                    addrs.by_addr.insert(address, id.clone());
                }
            }
        }
        addrs
    }
}
