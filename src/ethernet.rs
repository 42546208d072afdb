//! Ethernet II framing shared by every driver that puts real headers on the
//! wire (the TAP device and the mock link used in tests).

use std::cmp;
use std::sync::Arc;

use pnet::packet::ethernet::{EtherType, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;

use crate::device::NetworkDevice;
use crate::errors::{RxError, RxResult};
use crate::stack::StackCore;

pub(crate) const ADDR_LEN: usize = 6;
pub(crate) const HEADER_SIZE: usize = 14;
pub(crate) const FRAME_SIZE_MIN: usize = 60;
pub(crate) const FRAME_SIZE_MAX: usize = 1514;
pub(crate) const PAYLOAD_SIZE_MAX: usize = FRAME_SIZE_MAX - HEADER_SIZE;

/// Builds a complete frame around `payload`, zero padded up to the 60 byte
/// minimum the wire requires.
pub(crate) fn build_frame(
    src: MacAddr,
    dst: MacAddr,
    ether_type: EtherType,
    payload: &[u8],
) -> Vec<u8> {
    let len = cmp::max(HEADER_SIZE + payload.len(), FRAME_SIZE_MIN);
    let mut buffer = vec![0u8; len];
    {
        let mut frame = MutableEthernetPacket::new(&mut buffer).unwrap();
        frame.set_destination(dst);
        frame.set_source(src);
        frame.set_ethertype(ether_type);
        frame.payload_mut()[..payload.len()].copy_from_slice(payload);
    }
    buffer
}

/// Parses a received frame, strips the header and hands the payload to the
/// stack input handler under the frame's EtherType.
pub(crate) fn frame_input(core: &StackCore, dev: &Arc<NetworkDevice>, frame: &[u8]) -> RxResult {
    if frame.len() < HEADER_SIZE {
        return Err(RxError::InvalidLength);
    }
    let packet = EthernetPacket::new(frame).ok_or(RxError::InvalidLength)?;
    trace!(
        "dev={}, type=0x{:04x}, len={}",
        dev.name(),
        packet.get_ethertype().0,
        frame.len()
    );
    core.input(packet.get_ethertype(), packet.payload(), dev)
}
