use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;

use crate::ipv4::Ipv4Interface;

struct RouteEntry {
    net: Ipv4Network,
    gateway: Option<Ipv4Addr>,
    iface: Arc<Ipv4Interface>,
}

/// Longest-prefix-match routing table. A `None` gateway means the
/// destination network is directly attached to `iface`; routes of equal
/// prefix length are tried in insertion order.
#[derive(Default)]
pub(crate) struct RoutingTable {
    table: BTreeMap<u8, Vec<RouteEntry>>,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable {
            table: BTreeMap::new(),
        }
    }

    pub fn add_route(&mut self, net: Ipv4Network, gateway: Option<Ipv4Addr>, iface: Arc<Ipv4Interface>) {
        // normalized so that the network address has no host bits set
        let net = Ipv4Network::new(net.network(), net.prefix())
            .expect("prefix taken from an existing network");
        info!(
            "route added: network={}, gateway={}, iface={}",
            net,
            gateway.map_or_else(|| "direct".to_owned(), |gw| gw.to_string()),
            iface.unicast()
        );
        let entry = RouteEntry {
            net,
            gateway,
            iface,
        };
        self.table.entry(net.prefix()).or_insert_with(Vec::new).push(entry);
    }

    pub fn route(&self, dst: Ipv4Addr) -> Option<(Option<Ipv4Addr>, Arc<Ipv4Interface>)> {
        for entries in self.table.values().rev() {
            for entry in entries {
                if entry.net.contains(dst) {
                    return Some((entry.gateway, entry.iface.clone()));
                }
            }
        }
        None
    }
}
