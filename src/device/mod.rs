//! The uniform device layer all link drivers plug into. A device owns its
//! driver and at most one bound IPv4 interface; the interface keeps only a
//! weak back-reference so the two never form a cycle.

pub(crate) mod loopback;
#[cfg(target_os = "linux")]
pub(crate) mod tap;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use pnet::packet::ethernet::EtherType;
use pnet::util::MacAddr;

use crate::errors::{TxError, TxResult};
use crate::ipv4::Ipv4Interface;
use crate::stack::{StackCore, StackError, StackResult};
use crate::util;

pub(crate) const FLAG_LOOPBACK: u16 = 0x0010;
pub(crate) const FLAG_BROADCAST: u16 = 0x0020;
pub(crate) const FLAG_NEED_ARP: u16 = 0x0100;

/// What kind of link a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Loopback,
    Ethernet,
}

/// The operations a link driver provides. `open` and `poll` have defaults
/// because the loopback device needs neither.
pub(crate) trait DeviceDriver: Send + Sync {
    fn open(&self, _core: &StackCore, _dev: &Arc<NetworkDevice>) -> io::Result<()> {
        Ok(())
    }

    fn close(&self, _dev: &NetworkDevice) -> io::Result<()> {
        Ok(())
    }

    /// Transmits `data` as the payload of one link-level frame of
    /// `ether_type`, addressed to `dst`.
    fn transmit(
        &self,
        core: &StackCore,
        dev: &Arc<NetworkDevice>,
        ether_type: EtherType,
        data: &[u8],
        dst: MacAddr,
    ) -> TxResult;

    /// Reads any frames the device has ready and feeds them to the stack.
    fn poll(&self, _core: &StackCore, _dev: &Arc<NetworkDevice>) -> crate::RxResult {
        Ok(())
    }
}

/// One registered network device.
pub struct NetworkDevice {
    index: u32,
    name: String,
    kind: DeviceKind,
    mtu: usize,
    header_len: usize,
    address_len: usize,
    hwaddr: MacAddr,
    broadcast: MacAddr,
    flags: u16,
    up: AtomicBool,
    ipv4: RwLock<Option<Arc<Ipv4Interface>>>,
    driver: Box<dyn DeviceDriver>,
}

impl NetworkDevice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_driver(
        index: u32,
        name: String,
        kind: DeviceKind,
        mtu: usize,
        header_len: usize,
        address_len: usize,
        hwaddr: MacAddr,
        broadcast: MacAddr,
        flags: u16,
        driver: Box<dyn DeviceDriver>,
    ) -> NetworkDevice {
        NetworkDevice {
            index,
            name,
            kind,
            mtu,
            header_len,
            address_len,
            hwaddr,
            broadcast,
            flags,
            up: AtomicBool::new(false),
            ipv4: RwLock::new(None),
            driver,
        }
    }

    /// The stable index the device was registered under.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generated `net<index>` name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn address_len(&self) -> usize {
        self.address_len
    }

    /// The link-layer unicast address. All zero for addressless devices.
    pub fn hwaddr(&self) -> MacAddr {
        self.hwaddr
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    /// The IPv4 interface bound to this device, if one is.
    pub fn ipv4_interface(&self) -> Option<Arc<Ipv4Interface>> {
        self.ipv4.read().unwrap().clone()
    }

    pub(crate) fn broadcast_hwaddr(&self) -> MacAddr {
        self.broadcast
    }

    pub(crate) fn needs_link_resolution(&self) -> bool {
        self.flags & FLAG_NEED_ARP != 0
    }

    /// Binds `iface` to this device. A device carries at most one interface
    /// per address family, and IPv4 is the only family there is.
    pub(crate) fn bind_interface(&self, iface: Arc<Ipv4Interface>) -> StackResult<()> {
        let mut slot = self.ipv4.write().unwrap();
        if slot.is_some() {
            error!("interface already exists, dev={}", self.name);
            return Err(StackError::IllegalArgument);
        }
        *slot = Some(iface);
        Ok(())
    }

    pub(crate) fn open(self: &Arc<Self>, core: &StackCore) -> StackResult<()> {
        if self.is_up() {
            error!("already opened, dev={}", self.name);
            return Err(StackError::AlreadyRunning);
        }
        self.driver.open(core, self)?;
        self.up.store(true, Ordering::SeqCst);
        info!("dev={}, state=up", self.name);
        Ok(())
    }

    pub(crate) fn close(self: &Arc<Self>) -> StackResult<()> {
        if !self.is_up() {
            return Err(StackError::IllegalArgument);
        }
        self.driver.close(self)?;
        self.up.store(false, Ordering::SeqCst);
        info!("dev={}, state=down", self.name);
        Ok(())
    }

    /// Runs the driver poll hook. Called from the dispatcher when the
    /// device's IRQ fires.
    pub(crate) fn poll(self: &Arc<Self>, core: &StackCore) {
        if let Err(e) = self.driver.poll(core, self) {
            warn!("poll failed, dev={}: {}", self.name, e);
        }
    }
}

/// Hands one packet to the device for transmission. This is the single
/// egress funnel: device state and MTU are enforced here for every protocol.
pub(crate) fn output(
    core: &StackCore,
    dev: &Arc<NetworkDevice>,
    ether_type: EtherType,
    data: &[u8],
    dst: MacAddr,
) -> TxResult {
    if !dev.is_up() {
        error!("not opened, dev={}", dev.name());
        return Err(TxError::DeviceDown);
    }
    if data.len() > dev.mtu() {
        error!(
            "too long, dev={}, mtu={}, len={}",
            dev.name(),
            dev.mtu(),
            data.len()
        );
        return Err(TxError::TooLargePayload);
    }
    debug!(
        "dev={}, type=0x{:04x}, len={}",
        dev.name(),
        ether_type.0,
        data.len()
    );
    trace!("{}", util::hexdump(data));
    match dev.driver.transmit(core, dev, ether_type, data, dst) {
        Ok(()) => {
            core.stats.count_tx_frame();
            Ok(())
        }
        Err(e) => {
            core.stats.count_tx_error();
            error!("device transmit failure, dev={}, len={}", dev.name(), data.len());
            Err(e)
        }
    }
}
