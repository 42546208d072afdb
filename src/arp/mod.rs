//! The address resolution protocol: a fixed-size cache with aging, the
//! request/reply state machine, and the resolver the IPv4 egress path calls
//! when a device needs link-layer addresses.
//!
//! Every cache access happens under one mutex. The lock is never held
//! across a device transmit; the resolver decides what to do, releases the
//! lock, and only then puts a request on the wire.

mod arp_rx;
mod arp_tx;

pub(crate) use self::arp_rx::ArpInput;

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use crate::device::DeviceKind;
use crate::errors::TxError;
use crate::ipv4::Ipv4Interface;
use crate::stack::StackCore;

const CACHE_SIZE: usize = 32;
const CACHE_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const TIMER_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Free,
    /// A request for this address is in flight.
    Incomplete,
    Resolved,
    /// Pinned by hand, never aged out.
    Static,
}

#[derive(Clone, Copy)]
struct CacheEntry {
    state: EntryState,
    addr: Ipv4Addr,
    hwaddr: MacAddr,
    timestamp: Instant,
}

impl CacheEntry {
    fn clear(&mut self) {
        self.state = EntryState::Free;
        self.addr = Ipv4Addr::UNSPECIFIED;
        self.hwaddr = MacAddr::zero();
        self.timestamp = Instant::now();
    }
}

struct Slots([CacheEntry; CACHE_SIZE]);

impl Slots {
    fn new() -> Slots {
        Slots(
            [CacheEntry {
                state: EntryState::Free,
                addr: Ipv4Addr::UNSPECIFIED,
                hwaddr: MacAddr::zero(),
                timestamp: Instant::now(),
            }; CACHE_SIZE],
        )
    }

    fn select(&mut self, addr: Ipv4Addr) -> Option<&mut CacheEntry> {
        self.0
            .iter_mut()
            .find(|e| e.state != EntryState::Free && e.addr == addr)
    }

    /// The slot a new entry goes into: the first free one, or failing that
    /// the oldest one regardless of its state.
    fn alloc(&mut self) -> &mut CacheEntry {
        let index = self
            .0
            .iter()
            .position(|e| e.state == EntryState::Free)
            .unwrap_or_else(|| {
                self.0
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.timestamp)
                    .map(|(i, _)| i)
                    .expect("cache has entries")
            });
        &mut self.0[index]
    }

    /// Refreshes an existing mapping. Returns `false` when `addr` is not in
    /// the cache at all; no entry is created in that case.
    fn update(&mut self, addr: Ipv4Addr, hwaddr: MacAddr) -> bool {
        match self.select(addr) {
            Some(entry) => {
                entry.state = EntryState::Resolved;
                entry.hwaddr = hwaddr;
                entry.timestamp = Instant::now();
                debug!("update: pa={}, ha={}", addr, hwaddr);
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, addr: Ipv4Addr, hwaddr: MacAddr) {
        let entry = self.alloc();
        entry.state = EntryState::Resolved;
        entry.addr = addr;
        entry.hwaddr = hwaddr;
        entry.timestamp = Instant::now();
        debug!("insert: pa={}, ha={}", addr, hwaddr);
    }
}

pub(crate) struct ArpCache {
    slots: Mutex<Slots>,
}

pub(crate) enum Resolution {
    Found(MacAddr),
    /// Not resolved yet; a request has been broadcast.
    Incomplete,
}

impl ArpCache {
    pub fn new() -> ArpCache {
        ArpCache {
            slots: Mutex::new(Slots::new()),
        }
    }

    /// Merge step of the input rule: refresh the sender's mapping only if it
    /// is already cached.
    pub fn update(&self, addr: Ipv4Addr, hwaddr: MacAddr) -> bool {
        self.slots.lock().unwrap().update(addr, hwaddr)
    }

    pub fn insert(&self, addr: Ipv4Addr, hwaddr: MacAddr) {
        self.slots.lock().unwrap().insert(addr, hwaddr)
    }

    /// The aging sweep, run from the 1 second stack timer. Frees every
    /// non-static entry that has not been confirmed within the timeout.
    pub fn age(&self) {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();
        for entry in slots.0.iter_mut() {
            if entry.state == EntryState::Free || entry.state == EntryState::Static {
                continue;
            }
            if now.saturating_duration_since(entry.timestamp) > CACHE_TIMEOUT {
                debug!("delete: pa={}, ha={}", entry.addr, entry.hwaddr);
                entry.clear();
            }
        }
    }
}

/// Looks `target` up for transmission on `iface`.
///
/// A hit returns the cached address. A miss claims a cache slot, marks it
/// incomplete and broadcasts a request; a repeated miss re-broadcasts in
/// case the first request was lost, without claiming another slot. Either
/// way the caller gets [`Resolution::Incomplete`] and is expected to drop
/// its packet.
pub(crate) fn resolve(
    core: &StackCore,
    iface: &Arc<Ipv4Interface>,
    target: Ipv4Addr,
) -> Result<Resolution, TxError> {
    let dev = iface
        .device()
        .ok_or_else(|| TxError::Other("interface has no device".to_owned()))?;
    if dev.kind() != DeviceKind::Ethernet {
        return Err(TxError::Other(format!(
            "unsupported hardware address type on {}",
            dev.name()
        )));
    }
    let known = {
        let mut slots = core.arp.slots.lock().unwrap();
        match slots.select(target) {
            None => {
                let entry = slots.alloc();
                if entry.state != EntryState::Free {
                    debug!("evict: pa={}", entry.addr);
                }
                entry.state = EntryState::Incomplete;
                entry.addr = target;
                entry.hwaddr = MacAddr::zero();
                entry.timestamp = Instant::now();
                debug!("cache miss, pa={}", target);
                None
            }
            Some(entry) if entry.state == EntryState::Incomplete => None,
            Some(entry) => Some(entry.hwaddr),
        }
    };
    match known {
        Some(hwaddr) => {
            trace!("resolved, pa={}, ha={}", target, hwaddr);
            Ok(Resolution::Found(hwaddr))
        }
        None => {
            if let Err(e) = arp_tx::send_request(core, iface, target) {
                warn!("request for {} failed: {}", target, e);
            }
            Ok(Resolution::Incomplete)
        }
    }
}
