//! The sockets-style surface: a fixed table translating integer descriptors
//! and `SocketAddrV4` addresses to UDP control blocks. Datagram sockets in
//! the internet family are the only supported combination.

use std::net::SocketAddrV4;
use std::sync::Mutex;

use crate::ipv4::Endpoint;
use crate::stack::{StackCore, StackError, StackResult};
use crate::udp;

const MAX_SOCKETS: usize = 128;

/// Address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Inet,
}

/// Communication style of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
    Datagram,
    Stream,
}

#[derive(Clone, Copy)]
struct SocketEntry {
    family: Family,
    kind: SockType,
    pcb: usize,
}

pub(crate) struct SocketTable {
    slots: Mutex<Vec<Option<SocketEntry>>>,
}

impl SocketTable {
    pub fn new() -> SocketTable {
        SocketTable {
            slots: Mutex::new(vec![None; MAX_SOCKETS]),
        }
    }
}

pub(crate) fn open(core: &StackCore, family: Family, kind: SockType) -> StackResult<usize> {
    if family != Family::Inet || kind != SockType::Datagram {
        return Err(StackError::Unsupported);
    }
    let pcb = core.udp.open()?;
    let mut slots = core.sockets.slots.lock().unwrap();
    match slots.iter().position(|s| s.is_none()) {
        Some(id) => {
            slots[id] = Some(SocketEntry { family, kind, pcb });
            debug!("socket opened, id={}, pcb={}", id, pcb);
            Ok(id)
        }
        None => {
            drop(slots);
            let _ = core.udp.close(pcb);
            Err(StackError::PoolExhausted)
        }
    }
}

pub(crate) fn bind(core: &StackCore, id: usize, addr: SocketAddrV4) -> StackResult<()> {
    let entry = get(core, id)?;
    core.udp.bind(entry.pcb, Endpoint::from(addr))
}

pub(crate) fn sendto(
    core: &StackCore,
    id: usize,
    data: &[u8],
    addr: SocketAddrV4,
) -> StackResult<usize> {
    let entry = get(core, id)?;
    udp::sendto(core, entry.pcb, data, Endpoint::from(addr))
}

pub(crate) fn recvfrom(
    core: &StackCore,
    id: usize,
    buf: &mut [u8],
) -> StackResult<(usize, SocketAddrV4)> {
    let entry = get(core, id)?;
    let (len, remote) = core.udp.recvfrom(entry.pcb, buf)?;
    Ok((len, SocketAddrV4::from(remote)))
}

pub(crate) fn close(core: &StackCore, id: usize) -> StackResult<()> {
    let entry = {
        let mut slots = core.sockets.slots.lock().unwrap();
        match slots.get_mut(id).and_then(Option::take) {
            Some(entry) => entry,
            None => return Err(StackError::BadDescriptor),
        }
    };
    debug!("socket closed, id={}", id);
    core.udp.close(entry.pcb)
}

fn get(core: &StackCore, id: usize) -> StackResult<SocketEntry> {
    let slots = core.sockets.slots.lock().unwrap();
    let entry = slots
        .get(id)
        .and_then(|s| *s)
        .ok_or(StackError::BadDescriptor)?;
    if entry.family != Family::Inet || entry.kind != SockType::Datagram {
        return Err(StackError::Unsupported);
    }
    Ok(entry)
}
