use std::net::Ipv4Addr;
use std::sync::Arc;

use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::udp::{ipv4_checksum, UdpPacket};
use pnet::packet::Packet;

use crate::errors::{RxError, RxResult};
use crate::ipv4::{Endpoint, IpProtocol, Ipv4Interface};
use crate::stack::StackCore;

use super::Datagram;

pub(crate) struct UdpInput;

impl IpProtocol for UdpInput {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn protocol(&self) -> IpNextHeaderProtocol {
        IpNextHeaderProtocols::Udp
    }

    fn input(
        &self,
        core: &StackCore,
        data: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
        _iface: &Arc<Ipv4Interface>,
    ) {
        if let Err(e) = udp_input(core, data, src, dst) {
            core.stats.count_rx_drop();
            debug!("udp: dropped: {}", e);
        }
    }
}

fn udp_input(core: &StackCore, data: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> RxResult {
    let packet = UdpPacket::new(data).ok_or(RxError::InvalidLength)?;
    if packet.get_length() as usize != data.len() {
        return Err(RxError::InvalidLength);
    }
    // A checksum of zero means the sender did not compute one.
    let received = packet.get_checksum();
    if received != 0 {
        let expected = ipv4_checksum(&packet, &src, &dst);
        if received != expected && !(expected == 0 && received == 0xffff) {
            return Err(RxError::InvalidChecksum);
        }
    }
    debug!(
        "{}:{} => {}:{}, len={}",
        src,
        packet.get_source(),
        dst,
        packet.get_destination(),
        data.len()
    );
    core.udp.deliver(
        dst,
        packet.get_destination(),
        Datagram {
            remote: Endpoint::new(src, packet.get_source()),
            data: packet.payload().to_vec(),
        },
    )
}
