use std::net::Ipv4Addr;
use std::sync::Arc;

use pnet::packet::ethernet::EtherTypes;
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::{checksum, MutableIpv4Packet};
use pnet::packet::MutablePacket;
use pnet::util::MacAddr;

use crate::arp::{self, Resolution};
use crate::device::{self, NetworkDevice};
use crate::errors::{TxError, TxResult};
use crate::stack::{StackCore, StackError, StackResult};

use super::{Ipv4Interface, DEFAULT_TTL, MIN_HEADER_SIZE};

/// The interface packets towards `dst` would leave through, if any.
pub(crate) fn route_interface(core: &StackCore, dst: Ipv4Addr) -> Option<Arc<Ipv4Interface>> {
    core.ipv4
        .routes
        .read()
        .unwrap()
        .route(dst)
        .map(|(_, iface)| iface)
}

/// Routes, builds and transmits one IPv4 packet carrying `payload`.
///
/// An unspecified `src` picks the selected interface's address; a given
/// `src` must match it. Packets larger than the device MTU are refused,
/// there is no fragmentation. Returns the payload length on success.
pub(crate) fn send_packet(
    core: &StackCore,
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> StackResult<usize> {
    if src == Ipv4Addr::UNSPECIFIED && dst == Ipv4Addr::BROADCAST {
        error!("source address is required for broadcast");
        return Err(StackError::IllegalArgument);
    }
    let (gateway, iface) = core
        .ipv4
        .routes
        .read()
        .unwrap()
        .route(dst)
        .ok_or(StackError::NoRouteToHost)?;
    if src != Ipv4Addr::UNSPECIFIED && src != iface.unicast() {
        error!("source {} does not belong to the selected interface", src);
        return Err(StackError::IllegalArgument);
    }
    let nexthop = gateway.unwrap_or(dst);
    let dev = iface.device().ok_or(StackError::InvalidInterface)?;
    if MIN_HEADER_SIZE + payload.len() > dev.mtu() {
        error!(
            "packet size too large, dev={}, mtu={}, len={}",
            dev.name(),
            dev.mtu(),
            MIN_HEADER_SIZE + payload.len()
        );
        return Err(StackError::TxError(TxError::TooLargePayload));
    }
    let id = core.ipv4.generate_id();
    let packet = build_packet(protocol, payload, iface.unicast(), dst, id);
    debug!(
        "dev={}, iface={}, protocol={}(0x{:02x}), id={}, len={}",
        dev.name(),
        iface.unicast(),
        core.ipv4.protocol_name(protocol),
        protocol.0,
        id,
        packet.len()
    );
    output_device(core, &iface, &dev, &packet, nexthop).map_err(StackError::TxError)?;
    Ok(payload.len())
}

fn build_packet(
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    id: u16,
) -> Vec<u8> {
    let total = MIN_HEADER_SIZE + payload.len();
    let mut buffer = vec![0u8; total];
    {
        let mut packet = MutableIpv4Packet::new(&mut buffer).unwrap();
        packet.set_version(4);
        packet.set_header_length((MIN_HEADER_SIZE / 4) as u8);
        packet.set_dscp(0);
        packet.set_ecn(0);
        packet.set_total_length(total as u16);
        packet.set_identification(id);
        packet.set_flags(0);
        packet.set_fragment_offset(0);
        packet.set_ttl(DEFAULT_TTL);
        packet.set_next_level_protocol(protocol);
        packet.set_source(src);
        packet.set_destination(dst);
        packet.payload_mut().copy_from_slice(payload);
        let csum = checksum(&packet.to_immutable());
        packet.set_checksum(csum);
    }
    buffer
}

/// Link-level egress for a finished packet. Broadcast destinations use the
/// device broadcast address without consulting ARP; anything else on a
/// resolving device goes through the resolver, and an unresolved next hop
/// surfaces as [`TxError::UnresolvedLink`] so the caller observes the drop.
fn output_device(
    core: &StackCore,
    iface: &Arc<Ipv4Interface>,
    dev: &Arc<NetworkDevice>,
    packet: &[u8],
    dst: Ipv4Addr,
) -> TxResult {
    let mut hwaddr = MacAddr::zero();
    if dev.needs_link_resolution() {
        if dst == iface.broadcast() || dst == Ipv4Addr::BROADCAST {
            hwaddr = dev.broadcast_hwaddr();
        } else {
            match arp::resolve(core, iface, dst)? {
                Resolution::Found(mac) => hwaddr = mac,
                Resolution::Incomplete => return Err(TxError::UnresolvedLink),
            }
        }
    }
    device::output(core, dev, EtherTypes::Ipv4, packet, hwaddr)
}
