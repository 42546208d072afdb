use std::sync::Arc;

use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket};
use pnet::packet::ethernet::{EtherType, EtherTypes};

use crate::arp::arp_tx;
use crate::device::NetworkDevice;
use crate::errors::{RxError, RxResult};
use crate::ethernet;
use crate::stack::{LinkProtocol, StackCore};

/// Ingress side of ARP, implementing the classic merge-then-respond rule:
/// refresh the sender's mapping if we already track it, and only when the
/// packet targets our own address learn the sender and answer requests.
pub(crate) struct ArpInput;

impl LinkProtocol for ArpInput {
    fn name(&self) -> &'static str {
        "arp"
    }

    fn ether_type(&self) -> EtherType {
        EtherTypes::Arp
    }

    fn input(&self, core: &StackCore, data: &[u8], dev: &Arc<NetworkDevice>) {
        if let Err(e) = arp_input(core, data, dev) {
            core.stats.count_rx_drop();
            debug!("arp: dropped, dev={}: {}", dev.name(), e);
        }
    }
}

fn arp_input(core: &StackCore, data: &[u8], dev: &Arc<NetworkDevice>) -> RxResult {
    let packet = ArpPacket::new(data).ok_or(RxError::InvalidLength)?;
    if packet.get_hardware_type() != ArpHardwareTypes::Ethernet
        || packet.get_hw_addr_len() as usize != ethernet::ADDR_LEN
    {
        return Err(RxError::InvalidContent);
    }
    if packet.get_protocol_type() != EtherTypes::Ipv4 || packet.get_proto_addr_len() != 4 {
        return Err(RxError::InvalidContent);
    }
    let operation = packet.get_operation();
    let sender_hw = packet.get_sender_hw_addr();
    let sender_ip = packet.get_sender_proto_addr();
    let target_ip = packet.get_target_proto_addr();
    debug!(
        "dev={}, op=0x{:04x}, spa={}, sha={}, tpa={}",
        dev.name(),
        operation.0,
        sender_ip,
        sender_hw,
        target_ip
    );

    let merged = core.arp.update(sender_ip, sender_hw);
    let iface = match dev.ipv4_interface() {
        Some(iface) => iface,
        None => return Ok(()),
    };
    if iface.unicast() == target_ip {
        if !merged {
            core.arp.insert(sender_ip, sender_hw);
        }
        if operation == ArpOperations::Request {
            if let Err(e) = arp_tx::send_reply(core, &iface, sender_hw, sender_ip, sender_hw) {
                warn!("reply to {} failed: {}", sender_ip, e);
            }
        }
    }
    Ok(())
}
