//! # ustack - a user-space TCP/IP stack
//!
//! `ustack` is a small TCP/IP stack that runs entirely in user space on top
//! of a raw packet interface. It drives two kinds of network devices - a
//! software loopback and Ethernet over a Linux TAP device - and presents a
//! sockets-style datagram API to applications. Wire formats are handled by
//! [`pnet`](https://github.com/libpnet/libpnet) packet types, interface and
//! route addressing by [`ipnetwork`](https://github.com/achanda/ipnetwork).
//!
//! ## Receiving
//!
//! Every frame a device reads is stripped of its Ethernet header and pushed,
//! by EtherType, onto a per-protocol FIFO queue, raising a software IRQ. A
//! single dispatcher thread services those IRQs together with a periodic
//! timer tick and wake events: it drains the queues in protocol registration
//! order and runs each protocol handler synchronously, so handlers never run
//! concurrently with one another. ARP updates its cache and answers requests
//! for our address; IPv4 validates the header, then demultiplexes on the
//! protocol byte to ICMP or UDP; UDP matches the destination endpoint to a
//! control block and wakes any reader blocked on it.
//!
//! ## Sending
//!
//! Transmission is pull-driven from the calling thread. UDP builds a
//! datagram, IPv4 picks a route (longest prefix match) and a source
//! interface, builds and checksums the header, and hands the packet to the
//! device. If the device needs link-layer resolution the ARP resolver is
//! consulted; an unresolved next hop drops the packet with
//! [`TxError::UnresolvedLink`] after broadcasting an ARP request, so an
//! application retry shortly after will normally go through.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ustack::NetworkStack;
//!
//! let stack = NetworkStack::new();
//! let lo = stack.add_loopback().unwrap();
//! stack.add_ipv4(&lo, "127.0.0.1/8".parse().unwrap()).unwrap();
//! stack.run().unwrap();
//!
//! let sock = stack.udp_open().unwrap();
//! stack.udp_bind(sock, "127.0.0.1:7".parse().unwrap()).unwrap();
//! let mut buf = [0u8; 2048];
//! let (len, peer) = stack.udp_recvfrom(sock, &mut buf).unwrap();
//! stack.udp_sendto(sock, &buf[..len], peer).unwrap();
//! ```

#[macro_use]
extern crate log;

mod arp;
pub mod device;
mod dispatch;
mod errors;
mod ethernet;
mod icmp;
pub mod ipv4;
mod routing;
mod socket;
mod stack;
mod udp;
mod util;

pub mod testing;

pub use crate::device::{DeviceKind, NetworkDevice};
pub use crate::errors::{RxError, RxResult, TxError, TxResult};
pub use crate::ipv4::{Endpoint, Ipv4Interface, ParseEndpointError};
pub use crate::socket::{Family, SockType};
pub use crate::stack::{NetworkStack, StackError, StackResult, StatsSnapshot};
