//! UDP and the per-socket control blocks. A fixed pool of PCBs carries the
//! bound endpoint and a receive queue per socket; `recvfrom` is the only
//! blocking operation in the stack, waiting on the PCB's condition until
//! the dispatcher delivers a datagram or the stack is interrupted.

mod udp_rx;
mod udp_tx;

pub(crate) use self::udp_rx::UdpInput;

use std::cmp;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Condvar, Mutex};

use rand::Rng;

use crate::errors::{RxError, RxResult};
use crate::ipv4::{self, Endpoint};
use crate::stack::{StackCore, StackError, StackResult};

const PCB_COUNT: usize = 16;

const LOCAL_PORT_RANGE_START: u16 = 32768;
const LOCAL_PORT_RANGE_END: u16 = 61000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcbState {
    Free,
    Open,
    /// Closed while readers were still blocked; the last reader to wake up
    /// returns the slot to the pool.
    Closing,
}

pub(crate) struct Datagram {
    pub remote: Endpoint,
    pub data: Vec<u8>,
}

struct Pcb {
    state: PcbState,
    local: Endpoint,
    queue: VecDeque<Datagram>,
    waiters: usize,
    interrupted: bool,
}

impl Pcb {
    fn unused() -> Pcb {
        Pcb {
            state: PcbState::Free,
            local: Endpoint::new(Ipv4Addr::UNSPECIFIED, 0),
            queue: VecDeque::new(),
            waiters: 0,
            interrupted: false,
        }
    }
}

/// Two local endpoints collide when the ports match and either address is
/// the wildcard or they are the same address.
fn endpoints_overlap(a: Endpoint, b: Endpoint) -> bool {
    a.port == b.port
        && (a.addr == Ipv4Addr::UNSPECIFIED || b.addr == Ipv4Addr::UNSPECIFIED || a.addr == b.addr)
}

/// The PCB pool. One mutex covers allocation, lookup and the receive
/// queues; each slot has its own condition variable for blocked readers.
pub(crate) struct UdpPcbs {
    pcbs: Mutex<Vec<Pcb>>,
    conds: Vec<Condvar>,
}

impl UdpPcbs {
    pub fn new() -> UdpPcbs {
        UdpPcbs {
            pcbs: Mutex::new((0..PCB_COUNT).map(|_| Pcb::unused()).collect()),
            conds: (0..PCB_COUNT).map(|_| Condvar::new()).collect(),
        }
    }

    pub fn open(&self) -> StackResult<usize> {
        let mut pcbs = self.pcbs.lock().unwrap();
        match pcbs.iter().position(|p| p.state == PcbState::Free) {
            Some(id) => {
                pcbs[id] = Pcb::unused();
                pcbs[id].state = PcbState::Open;
                debug!("opened, id={}", id);
                Ok(id)
            }
            None => Err(StackError::PoolExhausted),
        }
    }

    pub fn bind(&self, id: usize, local: Endpoint) -> StackResult<()> {
        if local.port == 0 {
            return Err(StackError::IllegalArgument);
        }
        let mut pcbs = self.pcbs.lock().unwrap();
        check_open(&pcbs, id)?;
        let taken = pcbs
            .iter()
            .enumerate()
            .any(|(i, p)| i != id && p.state == PcbState::Open && endpoints_overlap(p.local, local));
        if taken {
            warn!("already in use, id={}, want={}", id, local);
            return Err(StackError::AddrInUse);
        }
        pcbs[id].local = local;
        debug!("bound, id={}, local={}", id, local);
        Ok(())
    }

    /// Blocks until a datagram is available, the socket is closed under the
    /// caller, or the stack is interrupted. Data beyond `buf` is discarded.
    pub fn recvfrom(&self, id: usize, buf: &mut [u8]) -> StackResult<(usize, Endpoint)> {
        let mut pcbs = self.pcbs.lock().unwrap();
        loop {
            check_open(&pcbs, id)?;
            if let Some(dgram) = pcbs[id].queue.pop_front() {
                let len = cmp::min(buf.len(), dgram.data.len());
                buf[..len].copy_from_slice(&dgram.data[..len]);
                return Ok((len, dgram.remote));
            }
            if pcbs[id].interrupted {
                return Err(StackError::Interrupted);
            }
            pcbs[id].waiters += 1;
            pcbs = self.conds[id].wait(pcbs).unwrap();
            pcbs[id].waiters -= 1;
            if pcbs[id].state == PcbState::Closing {
                if pcbs[id].waiters == 0 {
                    pcbs[id] = Pcb::unused();
                }
                return Err(StackError::Interrupted);
            }
        }
    }

    pub fn close(&self, id: usize) -> StackResult<()> {
        let mut pcbs = self.pcbs.lock().unwrap();
        check_open(&pcbs, id)?;
        debug!("closed, id={}, local={}", id, pcbs[id].local);
        if pcbs[id].waiters > 0 {
            pcbs[id].state = PcbState::Closing;
            pcbs[id].queue.clear();
            self.conds[id].notify_all();
        } else {
            pcbs[id] = Pcb::unused();
        }
        Ok(())
    }

    /// Runs on the dispatcher when a wake event signals termination: every
    /// blocked reader is released with an interrupted status.
    pub fn interrupt_all(&self) {
        let mut pcbs = self.pcbs.lock().unwrap();
        for (id, pcb) in pcbs.iter_mut().enumerate() {
            if pcb.state == PcbState::Open {
                pcb.interrupted = true;
                self.conds[id].notify_all();
            }
        }
    }

    /// Hands an incoming datagram to the PCB bound to `(addr, port)`,
    /// waking its readers.
    pub(crate) fn deliver(&self, addr: Ipv4Addr, port: u16, dgram: Datagram) -> RxResult {
        let mut pcbs = self.pcbs.lock().unwrap();
        let id = pcbs
            .iter()
            .position(|p| {
                p.state == PcbState::Open
                    && p.local.port == port
                    && (p.local.addr == Ipv4Addr::UNSPECIFIED || p.local.addr == addr)
            })
            .ok_or_else(|| RxError::NoListener(format!("udp {}:{}", addr, port)))?;
        pcbs[id].queue.push_back(dgram);
        debug!("queue pushed, id={}, num={}", id, pcbs[id].queue.len());
        self.conds[id].notify_all();
        Ok(())
    }
}

fn check_open(pcbs: &[Pcb], id: usize) -> StackResult<()> {
    match pcbs.get(id) {
        Some(pcb) if pcb.state == PcbState::Open => Ok(()),
        _ => Err(StackError::BadDescriptor),
    }
}

/// Sends `data` to `foreign` from the socket's bound endpoint. An unbound
/// source address is filled in from the route towards the destination, an
/// unbound port gets an ephemeral one which then sticks to the socket.
pub(crate) fn sendto(
    core: &StackCore,
    id: usize,
    data: &[u8],
    foreign: Endpoint,
) -> StackResult<usize> {
    let local = {
        let mut pcbs = core.udp.pcbs.lock().unwrap();
        check_open(&pcbs, id)?;
        let mut local = pcbs[id].local;
        if local.addr == Ipv4Addr::UNSPECIFIED {
            let iface =
                ipv4::route_interface(core, foreign.addr).ok_or(StackError::NoRouteToHost)?;
            local.addr = iface.unicast();
        }
        if local.port == 0 {
            let port = select_ephemeral_port(&pcbs, local.addr)?;
            pcbs[id].local.port = port;
            local.port = port;
            debug!("dynamic assign, id={}, port={}", id, port);
        }
        local
    };
    udp_tx::output(core, local, foreign, data)
}

fn select_ephemeral_port(pcbs: &[Pcb], addr: Ipv4Addr) -> StackResult<u16> {
    let range = LOCAL_PORT_RANGE_END - LOCAL_PORT_RANGE_START;
    let offset = rand::thread_rng().gen_range(0..range);
    for i in 0..range {
        let port = LOCAL_PORT_RANGE_START + (offset + i) % range;
        let candidate = Endpoint::new(addr, port);
        let in_use = pcbs
            .iter()
            .any(|p| p.state == PcbState::Open && endpoints_overlap(p.local, candidate));
        if !in_use {
            return Ok(port);
        }
    }
    Err(StackError::AddrInUse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_finite() {
        let pcbs = UdpPcbs::new();
        for _ in 0..PCB_COUNT {
            pcbs.open().unwrap();
        }
        assert!(matches!(pcbs.open(), Err(StackError::PoolExhausted)));
        pcbs.close(0).unwrap();
        assert_eq!(pcbs.open().unwrap(), 0);
    }

    #[test]
    fn bind_conflicts() {
        let pcbs = UdpPcbs::new();
        let a = pcbs.open().unwrap();
        let b = pcbs.open().unwrap();
        pcbs.bind(a, "10.0.0.1:7".parse().unwrap()).unwrap();
        assert!(matches!(
            pcbs.bind(b, "10.0.0.1:7".parse().unwrap()),
            Err(StackError::AddrInUse)
        ));
        // the wildcard overlaps any bound address on the same port
        assert!(matches!(
            pcbs.bind(b, "0.0.0.0:7".parse().unwrap()),
            Err(StackError::AddrInUse)
        ));
        pcbs.bind(b, "10.0.0.2:7".parse().unwrap()).unwrap();
    }

    #[test]
    fn rebind_same_socket_allowed() {
        let pcbs = UdpPcbs::new();
        let a = pcbs.open().unwrap();
        pcbs.bind(a, "10.0.0.1:7".parse().unwrap()).unwrap();
        pcbs.bind(a, "10.0.0.1:9".parse().unwrap()).unwrap();
    }

    #[test]
    fn delivery_matches_wildcard() {
        let pcbs = UdpPcbs::new();
        let a = pcbs.open().unwrap();
        pcbs.bind(a, "0.0.0.0:7".parse().unwrap()).unwrap();
        pcbs.deliver(
            Ipv4Addr::new(10, 0, 0, 1),
            7,
            Datagram {
                remote: "10.0.0.2:9".parse().unwrap(),
                data: b"hi".to_vec(),
            },
        )
        .unwrap();
        let mut buf = [0u8; 16];
        let (len, remote) = pcbs.recvfrom(a, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"hi");
        assert_eq!(remote, "10.0.0.2:9".parse().unwrap());
    }

    #[test]
    fn delivery_without_listener_is_refused() {
        let pcbs = UdpPcbs::new();
        let err = pcbs
            .deliver(
                Ipv4Addr::new(10, 0, 0, 1),
                7,
                Datagram {
                    remote: "10.0.0.2:9".parse().unwrap(),
                    data: Vec::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, RxError::NoListener(_)));
    }
}
