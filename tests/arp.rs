use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use ipnetwork::Ipv4Network;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;

use ustack::testing;
use ustack::{StackError, TxError};

fn our_mac() -> MacAddr {
    MacAddr::new(0x00, 0x00, 0x5e, 0x00, 0x53, 0x01)
}

fn our_ip() -> Ipv4Addr {
    Ipv4Addr::new(192, 0, 2, 2)
}

fn ether_stack() -> (
    ustack::NetworkStack,
    testing::InjectHandle,
    std::sync::mpsc::Receiver<Vec<u8>>,
) {
    let (stack, dev, inject, frames) = testing::dummy_stack(our_mac());
    stack
        .add_ipv4(&dev, Ipv4Network::new(our_ip(), 24).unwrap())
        .unwrap();
    stack.run().unwrap();
    (stack, inject, frames)
}

fn arp_frame(
    operation: ArpOperation,
    sender_hw: MacAddr,
    sender_ip: Ipv4Addr,
    target_hw: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut buffer =
        vec![0u8; EthernetPacket::minimum_packet_size() + ArpPacket::minimum_packet_size()];
    {
        let mut eth = MutableEthernetPacket::new(&mut buffer).unwrap();
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(sender_hw);
        eth.set_ethertype(EtherTypes::Arp);
        let mut arp = MutableArpPacket::new(eth.payload_mut()).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(operation);
        arp.set_sender_hw_addr(sender_hw);
        arp.set_sender_proto_addr(sender_ip);
        arp.set_target_hw_addr(target_hw);
        arp.set_target_proto_addr(target_ip);
    }
    buffer
}

fn try_send(stack: &ustack::NetworkStack, dst: Ipv4Addr) -> Result<usize, StackError> {
    stack.ip_send(
        IpNextHeaderProtocols::Udp,
        b"probe",
        Ipv4Addr::UNSPECIFIED,
        dst,
    )
}

#[test]
fn request_on_cold_miss_then_resolved() {
    let (stack, inject, frames) = ether_stack();
    let gateway = Ipv4Addr::new(192, 0, 2, 1);
    let gateway_mac = MacAddr::new(0xde, 0xad, 0xbe, 0xef, 0x00, 0x01);

    // The first send cannot be delivered: the caller observes the drop and
    // exactly one broadcast request goes out.
    match try_send(&stack, gateway) {
        Err(StackError::TxError(TxError::UnresolvedLink)) => (),
        other => panic!("expected unresolved link, got {:?}", other.map(|_| ())),
    }
    let frame_bytes = frames.recv_timeout(Duration::from_secs(2)).unwrap();
    let frame = EthernetPacket::new(&frame_bytes).unwrap();
    assert_eq!(frame.get_ethertype(), EtherTypes::Arp);
    assert_eq!(frame.get_destination(), MacAddr::broadcast());
    assert_eq!(frame.get_source(), our_mac());
    let request = ArpPacket::new(frame.payload()).unwrap();
    assert_eq!(request.get_operation(), ArpOperations::Request);
    assert_eq!(request.get_sender_hw_addr(), our_mac());
    assert_eq!(request.get_sender_proto_addr(), our_ip());
    assert_eq!(request.get_target_proto_addr(), gateway);

    // Feed the crafted reply; once the dispatcher has merged it the same
    // send goes through to the resolved address.
    inject.inject(&arp_frame(
        ArpOperations::Reply,
        gateway_mac,
        gateway,
        our_mac(),
        our_ip(),
    ));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match try_send(&stack, gateway) {
            Ok(_) => break,
            Err(StackError::TxError(TxError::UnresolvedLink)) => {
                assert!(Instant::now() < deadline, "reply never processed");
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    // Skip the re-broadcast requests from the retries; the delivered packet
    // must be IPv4 addressed to the resolved hardware address.
    loop {
        let frame_bytes = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        let frame = EthernetPacket::new(&frame_bytes).unwrap();
        if frame.get_ethertype() == EtherTypes::Ipv4 {
            assert_eq!(frame.get_destination(), gateway_mac);
            break;
        }
        assert_eq!(frame.get_ethertype(), EtherTypes::Arp);
    }
}

#[test]
fn incomplete_target_rerequests_without_new_entry() {
    let (stack, inject, frames) = ether_stack();
    let target = Ipv4Addr::new(192, 0, 2, 77);
    let target_mac = MacAddr::new(0xde, 0xad, 0xbe, 0xef, 0x00, 0x02);

    // Two misses back to back: both emit a request, both report the drop.
    for _ in 0..2 {
        match try_send(&stack, target) {
            Err(StackError::TxError(TxError::UnresolvedLink)) => (),
            other => panic!("expected unresolved link, got {:?}", other.map(|_| ())),
        }
        let frame_bytes = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        let frame = EthernetPacket::new(&frame_bytes).unwrap();
        assert_eq!(frame.get_ethertype(), EtherTypes::Arp);
        let request = ArpPacket::new(frame.payload()).unwrap();
        assert_eq!(request.get_target_proto_addr(), target);
    }

    // A single reply resolves the one incomplete entry both calls shared.
    inject.inject(&arp_frame(
        ArpOperations::Reply,
        target_mac,
        target,
        our_mac(),
        our_ip(),
    ));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match try_send(&stack, target) {
            Ok(_) => break,
            Err(StackError::TxError(TxError::UnresolvedLink)) => {
                assert!(Instant::now() < deadline, "reply never processed");
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}

#[test]
fn reply_to_request_for_our_address() {
    let (_stack, inject, frames) = ether_stack();
    let requester_ip = Ipv4Addr::new(192, 0, 2, 9);
    let requester_mac = MacAddr::new(9, 8, 7, 6, 5, 4);

    inject.inject(&arp_frame(
        ArpOperations::Request,
        requester_mac,
        requester_ip,
        MacAddr::zero(),
        our_ip(),
    ));

    let frame_bytes = frames.recv_timeout(Duration::from_secs(2)).unwrap();
    let frame = EthernetPacket::new(&frame_bytes).unwrap();
    assert_eq!(frame.get_ethertype(), EtherTypes::Arp);
    // unicast back to the requester, not broadcast
    assert_eq!(frame.get_destination(), requester_mac);
    let reply = ArpPacket::new(frame.payload()).unwrap();
    assert_eq!(reply.get_operation(), ArpOperations::Reply);
    assert_eq!(reply.get_sender_hw_addr(), our_mac());
    assert_eq!(reply.get_sender_proto_addr(), our_ip());
    assert_eq!(reply.get_target_hw_addr(), requester_mac);
    assert_eq!(reply.get_target_proto_addr(), requester_ip);
}

#[test]
fn request_for_other_address_ignored() {
    let (_stack, inject, frames) = ether_stack();

    inject.inject(&arp_frame(
        ArpOperations::Request,
        MacAddr::new(9, 8, 7, 6, 5, 4),
        Ipv4Addr::new(192, 0, 2, 9),
        MacAddr::zero(),
        Ipv4Addr::new(192, 0, 2, 200),
    ));

    thread::sleep(Duration::from_millis(300));
    assert!(frames.try_recv().is_err());
}
