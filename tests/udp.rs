use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use ustack::{NetworkStack, StackError};

fn loopback_stack() -> NetworkStack {
    let stack = NetworkStack::new();
    let lo = stack.add_loopback().unwrap();
    stack.add_ipv4(&lo, "127.0.0.1/8".parse().unwrap()).unwrap();
    stack.run().unwrap();
    stack
}

#[test]
fn echo_to_self() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    stack.udp_bind(sock, "127.0.0.1:7".parse().unwrap()).unwrap();

    let sent = stack
        .udp_sendto(sock, b"ping", "127.0.0.1:7".parse().unwrap())
        .unwrap();
    assert_eq!(sent, 4);

    let mut buf = [0u8; 32];
    let (len, remote) = stack.udp_recvfrom(sock, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"ping");
    assert_eq!(remote, "127.0.0.1:7".parse().unwrap());
}

#[test]
fn unbound_sender_gets_ephemeral_port() {
    let stack = loopback_stack();
    let server = stack.udp_open().unwrap();
    stack
        .udp_bind(server, "127.0.0.1:7".parse().unwrap())
        .unwrap();
    let client = stack.udp_open().unwrap();

    stack
        .udp_sendto(client, b"ping", "127.0.0.1:7".parse().unwrap())
        .unwrap();

    let mut buf = [0u8; 32];
    let (len, remote) = stack.udp_recvfrom(server, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"ping");
    assert_eq!(remote.addr, Ipv4Addr::new(127, 0, 0, 1));
    assert!(
        (32768..61000).contains(&remote.port),
        "port {} not ephemeral",
        remote.port
    );

    // and the full round trip: answer towards the learned endpoint
    stack.udp_sendto(server, b"pong", remote).unwrap();
    let (len, from) = stack.udp_recvfrom(client, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"pong");
    assert_eq!(from, "127.0.0.1:7".parse().unwrap());
}

#[test]
fn large_payload_roundtrip() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    stack.udp_bind(sock, "127.0.0.1:9".parse().unwrap()).unwrap();

    // the largest payload the loopback MTU admits: 65535 - 20 - 8
    let payload: Vec<u8> = (0..65507u32).map(|i| i as u8).collect();
    stack
        .udp_sendto(sock, &payload, "127.0.0.1:9".parse().unwrap())
        .unwrap();

    let mut buf = vec![0u8; 65536];
    let (len, _) = stack.udp_recvfrom(sock, &mut buf).unwrap();
    assert_eq!(len, payload.len());
    assert_eq!(&buf[..len], &payload[..]);

    // one byte more does not fit
    let too_big: Vec<u8> = vec![0; 65508];
    assert!(stack
        .udp_sendto(sock, &too_big, "127.0.0.1:9".parse().unwrap())
        .is_err());
}

#[test]
fn recvfrom_truncates_to_buffer() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    stack
        .udp_bind(sock, "127.0.0.1:11".parse().unwrap())
        .unwrap();

    stack
        .udp_sendto(sock, b"0123456789", "127.0.0.1:11".parse().unwrap())
        .unwrap();
    let mut buf = [0u8; 4];
    let (len, _) = stack.udp_recvfrom(sock, &mut buf).unwrap();
    assert_eq!(len, 4);
    assert_eq!(&buf, b"0123");

    // the rest of the datagram is gone, the next one is intact
    stack
        .udp_sendto(sock, b"next", "127.0.0.1:11".parse().unwrap())
        .unwrap();
    let mut buf = [0u8; 32];
    let (len, _) = stack.udp_recvfrom(sock, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"next");
}

#[test]
fn datagrams_delivered_in_order() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    stack
        .udp_bind(sock, "127.0.0.1:13".parse().unwrap())
        .unwrap();

    for i in 0..20u8 {
        stack
            .udp_sendto(sock, &[i], "127.0.0.1:13".parse().unwrap())
            .unwrap();
    }
    let mut buf = [0u8; 4];
    for i in 0..20u8 {
        let (len, _) = stack.udp_recvfrom(sock, &mut buf).unwrap();
        assert_eq!((len, buf[0]), (1, i));
    }
}

#[test]
fn interrupt_releases_blocked_reader() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    stack
        .udp_bind(sock, "127.0.0.1:15".parse().unwrap())
        .unwrap();

    let reader_stack = stack.clone();
    let reader = thread::spawn(move || {
        let mut buf = [0u8; 32];
        reader_stack.udp_recvfrom(sock, &mut buf)
    });

    thread::sleep(Duration::from_millis(200));
    stack.interrupt();
    let result = reader.join().unwrap();
    assert!(matches!(result, Err(StackError::Interrupted)));
}

#[test]
fn close_releases_blocked_reader() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    stack
        .udp_bind(sock, "127.0.0.1:17".parse().unwrap())
        .unwrap();

    let reader_stack = stack.clone();
    let reader = thread::spawn(move || {
        let mut buf = [0u8; 32];
        reader_stack.udp_recvfrom(sock, &mut buf)
    });

    thread::sleep(Duration::from_millis(200));
    stack.udp_close(sock).unwrap();
    let result = reader.join().unwrap();
    assert!(result.is_err());

    // the slot is reusable afterwards
    let again = stack.udp_open().unwrap();
    stack
        .udp_bind(again, "127.0.0.1:17".parse().unwrap())
        .unwrap();
}

#[test]
fn bind_rejects_unroutable_state() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    // port zero is never a valid binding
    assert!(matches!(
        stack.udp_bind(sock, ustack::Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 0)),
        Err(StackError::IllegalArgument)
    ));
    // an unknown descriptor is refused
    assert!(matches!(
        stack.udp_bind(99, "127.0.0.1:19".parse().unwrap()),
        Err(StackError::BadDescriptor)
    ));
}

#[test]
fn sendto_without_route_fails() {
    let stack = loopback_stack();
    let sock = stack.udp_open().unwrap();
    let err = stack
        .udp_sendto(sock, b"x", "10.1.2.3:9".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, StackError::NoRouteToHost));
}
