use std::error::Error;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use ipnetwork::Ipv4Network;
use pnet::packet::ethernet::EtherType;
use pnet::packet::ip::IpNextHeaderProtocol;
#[cfg(target_os = "linux")]
use pnet::util::MacAddr;

use crate::arp::{self, ArpCache, ArpInput};
use crate::device::{self, NetworkDevice};
use crate::dispatch::{Dispatcher, Event};
use crate::errors::{RxError, RxResult, TxError};
use crate::icmp::IcmpInput;
use crate::ipv4::{self, Endpoint, IpProtocol, Ipv4Input, Ipv4Interface, Ipv4State};
use crate::socket::{self, Family, SockType, SocketTable};
use crate::udp::{self, UdpInput, UdpPcbs};
use crate::util;

/// Entries a protocol input queue holds before refusing new frames.
const INPUT_QUEUE_LIMIT: usize = 1024;

/// Error returned upon invalid usage or state of the stack.
#[derive(Debug)]
pub enum StackError {
    /// An argument is out of range, conflicts with existing configuration,
    /// or an operation does not apply to the object's current state.
    IllegalArgument,

    /// No route matches the destination address.
    NoRouteToHost,

    /// The interface is unknown or its device is gone.
    InvalidInterface,

    /// Configuration was attempted after `run`, or `run` was called twice.
    AlreadyRunning,

    /// The local endpoint overlaps one already bound.
    AddrInUse,

    /// A fixed resource pool (PCBs, socket table) is exhausted.
    PoolExhausted,

    /// The descriptor does not name an open socket or PCB.
    BadDescriptor,

    /// The requested family or type combination is not supported.
    Unsupported,

    /// A blocking call was released by termination of the stack or by the
    /// socket closing underneath it.
    Interrupted,

    /// Transmission failed; carries the reason.
    TxError(TxError),

    /// An `io::Error` outside of transmission, e.g. while opening a device.
    IoError(io::Error),
}

impl From<TxError> for StackError {
    fn from(e: TxError) -> StackError {
        StackError::TxError(e)
    }
}

impl From<io::Error> for StackError {
    fn from(e: io::Error) -> StackError {
        StackError::IoError(e)
    }
}

impl From<StackError> for io::Error {
    fn from(e: StackError) -> io::Error {
        match e {
            StackError::IoError(io_e) => io_e,
            StackError::TxError(txe) => txe.into(),
            StackError::Interrupted => io::Error::new(io::ErrorKind::Interrupted, "interrupted"),
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StackError::IllegalArgument => write!(fmt, "illegal argument"),
            StackError::NoRouteToHost => write!(fmt, "no route to host"),
            StackError::InvalidInterface => write!(fmt, "invalid interface"),
            StackError::AlreadyRunning => write!(fmt, "stack is already running"),
            StackError::AddrInUse => write!(fmt, "address in use"),
            StackError::PoolExhausted => write!(fmt, "resource pool exhausted"),
            StackError::BadDescriptor => write!(fmt, "bad descriptor"),
            StackError::Unsupported => write!(fmt, "unsupported operation"),
            StackError::Interrupted => write!(fmt, "interrupted"),
            StackError::TxError(ref e) => write!(fmt, "transmit error: {}", e),
            StackError::IoError(ref e) => write!(fmt, "IO error: {}", e),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            StackError::TxError(ref e) => Some(e),
            StackError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

pub type StackResult<T> = Result<T, StackError>;

/// A handler for one EtherType, fed by the dispatcher from its input queue.
pub(crate) trait LinkProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    fn ether_type(&self) -> EtherType;

    fn input(&self, core: &StackCore, data: &[u8], dev: &Arc<NetworkDevice>);
}

pub(crate) struct ProtocolEntry {
    proto: Box<dyn LinkProtocol>,
    queue: util::InputQueue<(Arc<NetworkDevice>, Vec<u8>)>,
}

/// Data-path counters. Drops on ingress are silent by design; these are how
/// they stay observable.
pub(crate) struct Stats {
    rx_frames: AtomicU64,
    rx_dropped: AtomicU64,
    tx_frames: AtomicU64,
    tx_errors: AtomicU64,
}

impl Stats {
    fn new() -> Stats {
        Stats {
            rx_frames: AtomicU64::new(0),
            rx_dropped: AtomicU64::new(0),
            tx_frames: AtomicU64::new(0),
            tx_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn count_rx_frame(&self) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_rx_drop(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_tx_frame(&self) {
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of the stack's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames accepted onto a protocol queue.
    pub rx_frames: u64,
    /// Ingress drops: validation failures, missing listeners, full queues.
    pub rx_dropped: u64,
    /// Frames handed to a device for transmission.
    pub tx_frames: u64,
    /// Transmissions refused by a device.
    pub tx_errors: u64,
}

/// Everything the stack owns. Shared between the dispatcher thread and all
/// application threads; the registries are written only before `run`, the
/// ARP cache, PCB pool and queues carry their own locks.
pub(crate) struct StackCore {
    pub(crate) dispatch: Dispatcher,
    pub(crate) devices: RwLock<Vec<Arc<NetworkDevice>>>,
    protocols: Vec<ProtocolEntry>,
    pub(crate) ipv4: Ipv4State,
    pub(crate) arp: ArpCache,
    pub(crate) udp: UdpPcbs,
    pub(crate) sockets: SocketTable,
    pub(crate) stats: Stats,
    running: AtomicBool,
}

impl StackCore {
    fn new() -> StackCore {
        let link_protocols: Vec<Box<dyn LinkProtocol>> =
            vec![Box::new(ArpInput), Box::new(Ipv4Input)];
        let ip_protocols: Vec<Box<dyn IpProtocol>> =
            vec![Box::new(IcmpInput), Box::new(UdpInput)];

        let protocols = link_protocols
            .into_iter()
            .map(|proto| {
                info!(
                    "protocol registered: {} (0x{:04x})",
                    proto.name(),
                    proto.ether_type().0
                );
                ProtocolEntry {
                    proto,
                    queue: util::InputQueue::new(INPUT_QUEUE_LIMIT),
                }
            })
            .collect();

        let dispatch = Dispatcher::new();
        dispatch.register_timer("arp-aging", arp::TIMER_INTERVAL, |core| core.arp.age());
        dispatch.subscribe(|core| core.udp.interrupt_all());

        StackCore {
            dispatch,
            devices: RwLock::new(Vec::new()),
            protocols,
            ipv4: Ipv4State::new(ip_protocols),
            arp: ArpCache::new(),
            udp: UdpPcbs::new(),
            sockets: SocketTable::new(),
            stats: Stats::new(),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Guards every registration: the lists are traversed lock-free by the
    /// data path once the stack runs, so they must not change afterwards.
    pub(crate) fn ensure_config(&self) -> StackResult<()> {
        if self.is_running() {
            return Err(StackError::AlreadyRunning);
        }
        Ok(())
    }

    pub(crate) fn register_device(
        &self,
        build: impl FnOnce(u32, String) -> NetworkDevice,
    ) -> StackResult<Arc<NetworkDevice>> {
        self.ensure_config()?;
        let mut devices = self.devices.write().unwrap();
        let index = devices.len() as u32;
        let dev = Arc::new(build(index, format!("net{}", index)));
        info!("registered, dev={}, kind={:?}", dev.name(), dev.kind());
        devices.push(dev.clone());
        Ok(dev)
    }

    /// Entry point for payloads coming off a device: find the protocol for
    /// `ether_type`, queue a copy of the bytes and raise a soft IRQ. Frames
    /// for unknown EtherTypes are dropped without comment.
    pub(crate) fn input(
        &self,
        ether_type: EtherType,
        data: &[u8],
        dev: &Arc<NetworkDevice>,
    ) -> RxResult {
        let entry = match self
            .protocols
            .iter()
            .find(|e| e.proto.ether_type() == ether_type)
        {
            Some(entry) => entry,
            None => {
                trace!("unsupported type 0x{:04x}, dropping", ether_type.0);
                return Ok(());
            }
        };
        if !entry.queue.push((dev.clone(), data.to_vec())) {
            self.stats.count_rx_drop();
            warn!(
                "queue full, dropping, dev={}, type=0x{:04x}",
                dev.name(),
                ether_type.0
            );
            return Err(RxError::QueueFull);
        }
        self.stats.count_rx_frame();
        debug!(
            "queue pushed (num:{}), dev={}, type={}(0x{:04x}), len={}",
            entry.queue.len(),
            dev.name(),
            entry.proto.name(),
            ether_type.0,
            data.len()
        );
        trace!("{}", util::hexdump(data));
        self.dispatch.raise(Event::SoftIrq);
        Ok(())
    }

    /// Runs on the dispatcher for every soft IRQ: drain all queues in
    /// registration order, handing each entry to its protocol handler.
    pub(crate) fn protocol_handler(self: &Arc<Self>) {
        for entry in &self.protocols {
            while let Some((dev, data)) = entry.queue.pop() {
                debug!(
                    "queue popped (num:{}), dev={}, type={}, len={}",
                    entry.queue.len(),
                    dev.name(),
                    entry.proto.name(),
                    data.len()
                );
                entry.proto.input(self, &data, &dev);
            }
        }
    }
}

/// The stack handle. Cheap to clone; all clones drive the same stack, so
/// one application thread can block in [`NetworkStack::udp_recvfrom`] while
/// others keep sending.
#[derive(Clone)]
pub struct NetworkStack {
    core: Arc<StackCore>,
}

impl NetworkStack {
    /// Creates a stack with ARP, IPv4, ICMP and UDP registered but no
    /// devices. Configure devices, interfaces and routes, then [`run`].
    ///
    /// [`run`]: NetworkStack::run
    pub fn new() -> NetworkStack {
        let stack = NetworkStack {
            core: Arc::new(StackCore::new()),
        };
        info!("initialized");
        stack
    }

    pub(crate) fn core(&self) -> &Arc<StackCore> {
        &self.core
    }

    /// Registers the software loopback device.
    pub fn add_loopback(&self) -> StackResult<Arc<NetworkDevice>> {
        device::loopback::register(&self.core)
    }

    /// Opens the TAP device `name` and registers it as an Ethernet device
    /// with the given hardware address.
    #[cfg(target_os = "linux")]
    pub fn add_tap(&self, name: &str, hwaddr: MacAddr) -> StackResult<Arc<NetworkDevice>> {
        device::tap::register(&self.core, name, hwaddr)
    }

    /// Binds an IPv4 interface with the address and netmask of `net` to
    /// `dev`, and installs the directly-attached route for its network.
    pub fn add_ipv4(
        &self,
        dev: &Arc<NetworkDevice>,
        net: Ipv4Network,
    ) -> StackResult<Arc<Ipv4Interface>> {
        self.core.ensure_config()?;
        let iface = Arc::new(Ipv4Interface::new(Arc::downgrade(dev), net));
        dev.bind_interface(iface.clone())?;
        self.core.ipv4.interfaces.write().unwrap().push(iface.clone());
        self.core
            .ipv4
            .routes
            .write()
            .unwrap()
            .add_route(net, None, iface.clone());
        info!(
            "registered: dev={}, unicast={}, netmask={}, broadcast={}",
            dev.name(),
            iface.unicast(),
            iface.netmask(),
            iface.broadcast()
        );
        Ok(iface)
    }

    /// Installs a route to `net` through `iface`, optionally via a gateway.
    pub fn add_route(
        &self,
        net: Ipv4Network,
        gateway: Option<Ipv4Addr>,
        iface: &Arc<Ipv4Interface>,
    ) -> StackResult<()> {
        self.core.ensure_config()?;
        self.core
            .ipv4
            .routes
            .write()
            .unwrap()
            .add_route(net, gateway, iface.clone());
        Ok(())
    }

    /// Installs the default route `0.0.0.0/0` via `gateway` on `iface`.
    pub fn set_default_gateway(
        &self,
        iface: &Arc<Ipv4Interface>,
        gateway: Ipv4Addr,
    ) -> StackResult<()> {
        let all = Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).expect("the zero prefix is valid");
        self.add_route(all, Some(gateway), iface)
    }

    /// Starts the dispatcher and opens every registered device. After this
    /// the configuration is frozen. A device that cannot come up aborts the
    /// startup and shuts the stack down again.
    pub fn run(&self) -> StackResult<()> {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return Err(StackError::AlreadyRunning);
        }
        self.core.dispatch.spawn(&self.core)?;
        debug!("open all devices...");
        let devices = self.core.devices.read().unwrap().clone();
        for dev in &devices {
            if let Err(e) = dev.open(&self.core) {
                self.shutdown();
                return Err(e);
            }
        }
        debug!("running...");
        Ok(())
    }

    /// Closes every device and stops the dispatcher. Idempotent.
    pub fn shutdown(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("close all devices...");
        let devices = self.core.devices.read().unwrap().clone();
        for dev in &devices {
            if let Err(e) = dev.close() {
                warn!("close failed, dev={}: {}", dev.name(), e);
            }
        }
        self.core.dispatch.shutdown();
        debug!("shutdown");
    }

    /// Raises a wake event: all event subscribers run on the dispatcher,
    /// which releases every reader blocked in `recvfrom` with
    /// [`StackError::Interrupted`]. This is the hook a SIGINT handler calls.
    pub fn interrupt(&self) {
        self.core.dispatch.raise(Event::Wake);
    }

    pub fn interfaces(&self) -> Vec<Arc<Ipv4Interface>> {
        self.core.ipv4.interfaces.read().unwrap().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_frames: self.core.stats.rx_frames.load(Ordering::Relaxed),
            rx_dropped: self.core.stats.rx_dropped.load(Ordering::Relaxed),
            tx_frames: self.core.stats.tx_frames.load(Ordering::Relaxed),
            tx_errors: self.core.stats.tx_errors.load(Ordering::Relaxed),
        }
    }

    /// Sends one IPv4 packet carrying `payload` under `protocol`. See the
    /// crate documentation for the source selection and MTU rules.
    pub fn ip_send(
        &self,
        protocol: IpNextHeaderProtocol,
        payload: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> StackResult<usize> {
        ipv4::send_packet(&self.core, protocol, payload, src, dst)
    }

    pub fn udp_open(&self) -> StackResult<usize> {
        self.core.udp.open()
    }

    pub fn udp_bind(&self, id: usize, local: Endpoint) -> StackResult<()> {
        self.core.udp.bind(id, local)
    }

    pub fn udp_sendto(&self, id: usize, data: &[u8], foreign: Endpoint) -> StackResult<usize> {
        udp::sendto(&self.core, id, data, foreign)
    }

    /// Blocks until a datagram arrives for the PCB. Returns the number of
    /// bytes copied (at most `buf.len()`, the rest of the datagram is
    /// discarded) and the sender's endpoint.
    pub fn udp_recvfrom(&self, id: usize, buf: &mut [u8]) -> StackResult<(usize, Endpoint)> {
        self.core.udp.recvfrom(id, buf)
    }

    pub fn udp_close(&self, id: usize) -> StackResult<()> {
        self.core.udp.close(id)
    }

    /// Allocates a socket descriptor. Only `(Inet, Datagram)` is accepted.
    pub fn socket(&self, family: Family, kind: SockType) -> StackResult<usize> {
        socket::open(&self.core, family, kind)
    }

    pub fn bind(&self, socket: usize, addr: SocketAddrV4) -> StackResult<()> {
        socket::bind(&self.core, socket, addr)
    }

    pub fn sendto(&self, socket: usize, data: &[u8], addr: SocketAddrV4) -> StackResult<usize> {
        socket::sendto(&self.core, socket, data, addr)
    }

    pub fn recvfrom(&self, socket: usize, buf: &mut [u8]) -> StackResult<(usize, SocketAddrV4)> {
        socket::recvfrom(&self.core, socket, buf)
    }

    pub fn close(&self, socket: usize) -> StackResult<()> {
        socket::close(&self.core, socket)
    }
}

impl Default for NetworkStack {
    fn default() -> Self {
        Self::new()
    }
}
