use std::net::{Ipv4Addr, SocketAddrV4};

use ustack::{Family, NetworkStack, SockType, StackError};

fn loopback_stack() -> NetworkStack {
    let stack = NetworkStack::new();
    let lo = stack.add_loopback().unwrap();
    stack.add_ipv4(&lo, "127.0.0.1/8".parse().unwrap()).unwrap();
    stack.run().unwrap();
    stack
}

fn local(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port)
}

#[test]
fn only_inet_datagram_supported() {
    let stack = loopback_stack();
    assert!(matches!(
        stack.socket(Family::Inet, SockType::Stream),
        Err(StackError::Unsupported)
    ));
    let sock = stack.socket(Family::Inet, SockType::Datagram).unwrap();
    stack.close(sock).unwrap();
}

#[test]
fn echo_through_socket_layer() {
    let stack = loopback_stack();
    let server = stack.socket(Family::Inet, SockType::Datagram).unwrap();
    stack.bind(server, local(7)).unwrap();
    let client = stack.socket(Family::Inet, SockType::Datagram).unwrap();

    assert_eq!(stack.sendto(client, b"ping", local(7)).unwrap(), 4);

    let mut buf = [0u8; 32];
    let (len, peer) = stack.recvfrom(server, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"ping");
    assert_eq!(*peer.ip(), Ipv4Addr::new(127, 0, 0, 1));

    assert_eq!(stack.sendto(server, &buf[..len], peer).unwrap(), 4);
    let (len, from) = stack.recvfrom(client, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"ping");
    assert_eq!(from, local(7));
}

#[test]
fn closed_descriptor_is_invalid() {
    let stack = loopback_stack();
    let sock = stack.socket(Family::Inet, SockType::Datagram).unwrap();
    stack.close(sock).unwrap();

    assert!(matches!(
        stack.bind(sock, local(7)),
        Err(StackError::BadDescriptor)
    ));
    assert!(matches!(
        stack.close(sock),
        Err(StackError::BadDescriptor)
    ));
    let mut buf = [0u8; 8];
    assert!(matches!(
        stack.recvfrom(sock, &mut buf),
        Err(StackError::BadDescriptor)
    ));

    // descriptors are recycled
    let again = stack.socket(Family::Inet, SockType::Datagram).unwrap();
    assert_eq!(again, sock);
}

#[test]
fn bind_conflict_reported() {
    let stack = loopback_stack();
    let a = stack.socket(Family::Inet, SockType::Datagram).unwrap();
    let b = stack.socket(Family::Inet, SockType::Datagram).unwrap();
    stack.bind(a, local(7)).unwrap();
    assert!(matches!(
        stack.bind(b, local(7)),
        Err(StackError::AddrInUse)
    ));
    stack.bind(b, local(9)).unwrap();
}
