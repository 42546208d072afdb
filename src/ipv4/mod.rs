//! IPv4 addressing, interfaces and the forwarding plane.

mod ipv4_rx;
mod ipv4_tx;

pub(crate) use self::ipv4_rx::Ipv4Input;
pub(crate) use self::ipv4_tx::{route_interface, send_packet};

use std::error::Error;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock, Weak};

use ipnetwork::Ipv4Network;
use pnet::packet::ip::IpNextHeaderProtocol;

use crate::device::NetworkDevice;
use crate::routing::RoutingTable;
use crate::stack::StackCore;

pub(crate) const MIN_HEADER_SIZE: usize = 20;
pub(crate) const DEFAULT_TTL: u8 = 0xff;

// More-fragments bit of the flags field as pnet exposes it.
pub(crate) const MORE_FRAGMENTS: u8 = 0b001;

/// An `(address, port)` pair, displayed and parsed as `A.B.C.D:port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: Ipv4Addr, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.addr, self.port)
    }
}

/// Returned when a string is not a valid `A.B.C.D:port` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseEndpointError;

impl fmt::Display for ParseEndpointError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "invalid endpoint, expected A.B.C.D:port")
    }
}

impl Error for ParseEndpointError {}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Endpoint, ParseEndpointError> {
        let (addr, port) = s.rsplit_once(':').ok_or(ParseEndpointError)?;
        let addr = addr.parse::<Ipv4Addr>().map_err(|_| ParseEndpointError)?;
        let port = port.parse::<u16>().map_err(|_| ParseEndpointError)?;
        if port == 0 {
            return Err(ParseEndpointError);
        }
        Ok(Endpoint { addr, port })
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Endpoint {
        Endpoint::new(*addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddrV4 {
    fn from(ep: Endpoint) -> SocketAddrV4 {
        SocketAddrV4::new(ep.addr, ep.port)
    }
}

/// An IPv4 interface bound to a network device. Holds only a weak reference
/// back to its device; the device owns the interface.
pub struct Ipv4Interface {
    device: Weak<NetworkDevice>,
    network: Ipv4Network,
}

impl Ipv4Interface {
    pub(crate) fn new(device: Weak<NetworkDevice>, network: Ipv4Network) -> Ipv4Interface {
        Ipv4Interface { device, network }
    }

    pub fn unicast(&self) -> Ipv4Addr {
        self.network.ip()
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.network.mask()
    }

    /// The directed broadcast address,
    /// `(unicast & netmask) | !netmask`.
    pub fn broadcast(&self) -> Ipv4Addr {
        self.network.broadcast()
    }

    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    pub(crate) fn device(&self) -> Option<Arc<NetworkDevice>> {
        self.device.upgrade()
    }
}

impl fmt::Debug for Ipv4Interface {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Ipv4Interface")
            .field("network", &self.network)
            .finish()
    }
}

/// An upper-layer protocol fed by the IPv4 demultiplexer.
pub(crate) trait IpProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// The protocol byte this handler wants.
    fn protocol(&self) -> IpNextHeaderProtocol;

    /// Called with the IP payload of every validated packet carrying this
    /// protocol byte.
    fn input(
        &self,
        core: &StackCore,
        data: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
        iface: &Arc<Ipv4Interface>,
    );
}

/// Everything the IPv4 plane owns: the interface list, the routing table,
/// the upper-protocol registry and the packet id counter. Interfaces,
/// routes and protocols are only written before the stack runs.
pub(crate) struct Ipv4State {
    pub(crate) interfaces: RwLock<Vec<Arc<Ipv4Interface>>>,
    pub(crate) routes: RwLock<RoutingTable>,
    protocols: Vec<Box<dyn IpProtocol>>,
    next_id: Mutex<u16>,
}

impl Ipv4State {
    /// The id counter deliberately starts above the small values a fresh
    /// host would otherwise share with everyone else's first packets.
    const FIRST_ID: u16 = 128;

    pub fn new(protocols: Vec<Box<dyn IpProtocol>>) -> Ipv4State {
        for (i, proto) in protocols.iter().enumerate() {
            debug_assert!(
                protocols[..i].iter().all(|p| p.protocol() != proto.protocol()),
                "duplicate ip protocol registration"
            );
            info!("protocol registered: {} (0x{:02x})", proto.name(), proto.protocol().0);
        }
        Ipv4State {
            interfaces: RwLock::new(Vec::new()),
            routes: RwLock::new(RoutingTable::new()),
            protocols,
            next_id: Mutex::new(Self::FIRST_ID),
        }
    }

    pub fn protocol_name(&self, protocol: IpNextHeaderProtocol) -> &'static str {
        self.protocols
            .iter()
            .find(|p| p.protocol() == protocol)
            .map_or("unknown", |p| p.name())
    }

    pub fn protocol(&self, protocol: IpNextHeaderProtocol) -> Option<&dyn IpProtocol> {
        self.protocols
            .iter()
            .find(|p| p.protocol() == protocol)
            .map(|p| p.as_ref())
    }

    /// The identification for the next outgoing packet. Monotonic modulo
    /// 2^16 within a run.
    pub fn generate_id(&self) -> u16 {
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_roundtrip() {
        for s in ["127.0.0.1:7", "192.0.2.2:65535", "0.0.0.0:1"] {
            let ep: Endpoint = s.parse().unwrap();
            assert_eq!(ep.to_string(), s);
        }
    }

    #[test]
    fn endpoint_rejects_garbage() {
        for s in [
            "",
            "127.0.0.1",
            ":7",
            "127.0.0.1:",
            "127.0.0.1:0",
            "127.0.0.1:65536",
            "300.0.0.1:7",
            "a.b.c.d:7",
        ] {
            assert!(s.parse::<Endpoint>().is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn broadcast_follows_netmask() {
        let net = Ipv4Network::with_netmask(
            Ipv4Addr::new(192, 0, 2, 2),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();
        let iface = Ipv4Interface::new(Weak::new(), net);
        assert_eq!(iface.broadcast(), Ipv4Addr::new(192, 0, 2, 255));
        let unicast = u32::from(iface.unicast());
        let netmask = u32::from(iface.netmask());
        let broadcast = u32::from(iface.broadcast());
        assert_eq!(broadcast, (unicast & netmask) | !netmask);
    }

    #[test]
    fn id_sequence_monotonic_and_wrapping() {
        let state = Ipv4State::new(Vec::new());
        assert_eq!(state.generate_id(), 128);
        assert_eq!(state.generate_id(), 129);
        *state.next_id.lock().unwrap() = u16::MAX;
        assert_eq!(state.generate_id(), u16::MAX);
        assert_eq!(state.generate_id(), 0);
    }
}
