use std::net::Ipv4Addr;
use std::sync::Arc;

use pnet::packet::ethernet::{EtherType, EtherTypes};
use pnet::packet::ipv4::{checksum, Ipv4Packet};

use crate::device::NetworkDevice;
use crate::errors::{RxError, RxResult};
use crate::stack::{LinkProtocol, StackCore};

use super::{MIN_HEADER_SIZE, MORE_FRAGMENTS};

/// Ingress side of the IPv4 plane. Validates every header field before a
/// packet is demultiplexed to an upper-layer protocol; anything invalid is
/// dropped and counted, never answered.
pub(crate) struct Ipv4Input;

impl LinkProtocol for Ipv4Input {
    fn name(&self) -> &'static str {
        "ip"
    }

    fn ether_type(&self) -> EtherType {
        EtherTypes::Ipv4
    }

    fn input(&self, core: &StackCore, data: &[u8], dev: &Arc<NetworkDevice>) {
        if let Err(e) = ip_input(core, data, dev) {
            core.stats.count_rx_drop();
            debug!("ip: dropped, dev={}: {}", dev.name(), e);
        }
    }
}

fn ip_input(core: &StackCore, data: &[u8], dev: &Arc<NetworkDevice>) -> RxResult {
    let iface = dev
        .ipv4_interface()
        .ok_or_else(|| RxError::NoListener(format!("no ipv4 interface on {}", dev.name())))?;
    if data.len() < MIN_HEADER_SIZE {
        return Err(RxError::InvalidLength);
    }
    let packet = Ipv4Packet::new(data).ok_or(RxError::InvalidLength)?;
    if packet.get_version() != 4 {
        return Err(RxError::InvalidContent);
    }
    let header_len = packet.get_header_length() as usize * 4;
    if header_len < MIN_HEADER_SIZE || header_len > data.len() {
        return Err(RxError::InvalidLength);
    }
    let total_len = packet.get_total_length() as usize;
    if total_len < header_len || total_len > data.len() {
        return Err(RxError::InvalidLength);
    }
    if packet.get_checksum() != checksum(&packet) {
        return Err(RxError::InvalidChecksum);
    }
    // Reassembly is unsupported, fragments are refused outright.
    if packet.get_flags() & MORE_FRAGMENTS != 0 || packet.get_fragment_offset() != 0 {
        return Err(RxError::InvalidContent);
    }
    let dst = packet.get_destination();
    if dst != iface.unicast() && dst != iface.broadcast() && dst != Ipv4Addr::BROADCAST {
        return Err(RxError::NoListener(format!("ipv4 {}", dst)));
    }
    let src = packet.get_source();
    let protocol = packet.get_next_level_protocol();
    debug!(
        "dev={}, iface={}, protocol={}(0x{:02x}), len={}",
        dev.name(),
        iface.unicast(),
        core.ipv4.protocol_name(protocol),
        protocol.0,
        total_len
    );
    // Anything past the stated total length is tolerated link padding.
    let payload = &data[header_len..total_len];
    match core.ipv4.protocol(protocol) {
        Some(handler) => {
            handler.input(core, payload, src, dst, &iface);
            Ok(())
        }
        None => Err(RxError::NoListener(format!(
            "ipv4 protocol 0x{:02x}",
            protocol.0
        ))),
    }
}
