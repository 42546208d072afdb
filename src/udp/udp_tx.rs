use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::udp::{ipv4_checksum, MutableUdpPacket, UdpPacket};

use crate::errors::TxError;
use crate::ipv4::{self, Endpoint};
use crate::stack::{StackCore, StackError, StackResult};

/// Builds one datagram and hands it to the IPv4 plane. A computed checksum
/// of zero goes on the wire as 0xffff; zero itself means "not checked".
pub(crate) fn output(
    core: &StackCore,
    src: Endpoint,
    dst: Endpoint,
    payload: &[u8],
) -> StackResult<usize> {
    let total = UdpPacket::minimum_packet_size() + payload.len();
    if total > u16::MAX as usize {
        return Err(StackError::TxError(TxError::TooLargePayload));
    }
    let mut buffer = vec![0u8; total];
    {
        let mut packet = MutableUdpPacket::new(&mut buffer).unwrap();
        packet.set_source(src.port);
        packet.set_destination(dst.port);
        packet.set_length(total as u16);
        packet.set_payload(payload);
        let mut csum = ipv4_checksum(&packet.to_immutable(), &src.addr, &dst.addr);
        if csum == 0 {
            csum = 0xffff;
        }
        packet.set_checksum(csum);
    }
    debug!("{} => {}, len={}", src, dst, total);
    ipv4::send_packet(core, IpNextHeaderProtocols::Udp, &buffer, src.addr, dst.addr)?;
    Ok(payload.len())
}
