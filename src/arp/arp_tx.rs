use std::net::Ipv4Addr;
use std::sync::Arc;

use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::EtherTypes;
use pnet::util::MacAddr;

use crate::device;
use crate::errors::{TxError, TxResult};
use crate::ethernet;
use crate::ipv4::Ipv4Interface;
use crate::stack::StackCore;

/// Broadcasts a request for `target` with our own addresses as sender.
pub(crate) fn send_request(
    core: &StackCore,
    iface: &Arc<Ipv4Interface>,
    target: Ipv4Addr,
) -> TxResult {
    let dev = iface
        .device()
        .ok_or_else(|| TxError::Other("interface has no device".to_owned()))?;
    let packet = build(
        ArpOperations::Request,
        dev.hwaddr(),
        iface.unicast(),
        MacAddr::zero(),
        target,
    );
    debug!("dev={}, opcode=request, tpa={}", dev.name(), target);
    device::output(core, &dev, EtherTypes::Arp, &packet, dev.broadcast_hwaddr())
}

/// Answers a request. The reply goes unicast to the requester's hardware
/// address rather than being broadcast.
pub(crate) fn send_reply(
    core: &StackCore,
    iface: &Arc<Ipv4Interface>,
    target_hw: MacAddr,
    target_ip: Ipv4Addr,
    dst: MacAddr,
) -> TxResult {
    let dev = iface
        .device()
        .ok_or_else(|| TxError::Other("interface has no device".to_owned()))?;
    let packet = build(
        ArpOperations::Reply,
        dev.hwaddr(),
        iface.unicast(),
        target_hw,
        target_ip,
    );
    debug!("dev={}, opcode=reply, tpa={}", dev.name(), target_ip);
    device::output(core, &dev, EtherTypes::Arp, &packet, dst)
}

fn build(
    operation: ArpOperation,
    sender_hw: MacAddr,
    sender_ip: Ipv4Addr,
    target_hw: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut buffer = vec![0u8; ArpPacket::minimum_packet_size()];
    {
        let mut packet = MutableArpPacket::new(&mut buffer).unwrap();
        packet.set_hardware_type(ArpHardwareTypes::Ethernet);
        packet.set_protocol_type(EtherTypes::Ipv4);
        packet.set_hw_addr_len(ethernet::ADDR_LEN as u8);
        packet.set_proto_addr_len(4);
        packet.set_operation(operation);
        packet.set_sender_hw_addr(sender_hw);
        packet.set_sender_proto_addr(sender_ip);
        packet.set_target_hw_addr(target_hw);
        packet.set_target_proto_addr(target_ip);
    }
    buffer
}
