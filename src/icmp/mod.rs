//! Internet control message protocol. Only the echo responder is wired up:
//! a valid Echo Request addressed to us comes back as an Echo Reply with
//! the identifier, sequence number and payload untouched.

use std::net::Ipv4Addr;
use std::sync::Arc;

use pnet::packet::icmp::{checksum, IcmpPacket, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};

use crate::errors::{RxError, RxResult};
use crate::ipv4::{self, IpProtocol, Ipv4Interface};
use crate::stack::StackCore;

const MIN_MESSAGE_SIZE: usize = 8;

pub(crate) struct IcmpInput;

impl IpProtocol for IcmpInput {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn protocol(&self) -> IpNextHeaderProtocol {
        IpNextHeaderProtocols::Icmp
    }

    fn input(
        &self,
        core: &StackCore,
        data: &[u8],
        src: Ipv4Addr,
        _dst: Ipv4Addr,
        iface: &Arc<Ipv4Interface>,
    ) {
        if let Err(e) = icmp_input(core, data, src, iface) {
            core.stats.count_rx_drop();
            debug!("icmp: dropped: {}", e);
        }
    }
}

fn icmp_input(
    core: &StackCore,
    data: &[u8],
    src: Ipv4Addr,
    iface: &Arc<Ipv4Interface>,
) -> RxResult {
    if data.len() < MIN_MESSAGE_SIZE {
        return Err(RxError::InvalidLength);
    }
    let packet = IcmpPacket::new(data).ok_or(RxError::InvalidLength)?;
    if packet.get_checksum() != checksum(&packet) {
        return Err(RxError::InvalidChecksum);
    }
    let icmp_type = packet.get_icmp_type();
    if icmp_type != IcmpTypes::EchoRequest {
        trace!("type {} from {} ignored", icmp_type.0, src);
        return Ok(());
    }
    debug!("echo request from {}, len={}", src, data.len());
    let mut buffer = data.to_vec();
    {
        let mut reply = MutableIcmpPacket::new(&mut buffer).unwrap();
        reply.set_icmp_type(IcmpTypes::EchoReply);
        let csum = checksum(&reply.to_immutable());
        reply.set_checksum(csum);
    }
    if let Err(e) = ipv4::send_packet(
        core,
        IpNextHeaderProtocols::Icmp,
        &buffer,
        iface.unicast(),
        src,
    ) {
        warn!("echo reply to {} failed: {}", src, e);
    }
    Ok(())
}
