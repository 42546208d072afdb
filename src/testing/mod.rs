//! Test helpers: a stack wired to a mock Ethernet link instead of a real
//! device. Everything the stack transmits shows up as complete frames on a
//! channel, and crafted frames can be injected as if they had been read
//! from the wire. Used by the integration tests, usable by anyone testing
//! against the stack.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use pnet::packet::ethernet::EtherType;
use pnet::util::MacAddr;

use crate::device::{self, DeviceDriver, DeviceKind, NetworkDevice};
use crate::errors::{TxError, TxResult};
use crate::ethernet;
use crate::stack::{NetworkStack, StackCore};

struct MockLink {
    frames: Mutex<Sender<Vec<u8>>>,
}

impl DeviceDriver for MockLink {
    fn transmit(
        &self,
        _core: &StackCore,
        dev: &Arc<NetworkDevice>,
        ether_type: EtherType,
        data: &[u8],
        dst: MacAddr,
    ) -> TxResult {
        let frame = ethernet::build_frame(dev.hwaddr(), dst, ether_type, data);
        self.frames
            .lock()
            .unwrap()
            .send(frame)
            .map_err(|_| TxError::Other("frame receiver closed".to_owned()))
    }
}

/// Feeds raw Ethernet frames into the stack the way a device poll would.
pub struct InjectHandle {
    core: Arc<StackCore>,
    dev: Arc<NetworkDevice>,
}

impl InjectHandle {
    /// Injects one frame. Delivery is asynchronous: the frame is queued and
    /// the dispatcher picks it up, exactly like real ingress.
    pub fn inject(&self, frame: &[u8]) {
        if let Err(e) = ethernet::frame_input(&self.core, &self.dev, frame) {
            debug!("injected frame refused: {}", e);
        }
    }
}

/// Creates a stack with one mock Ethernet device (MTU 1500, broadcast and
/// ARP capable) using `hwaddr`. Returns the stack, the device, an injection
/// handle and the channel on which transmitted frames appear.
///
/// The stack is not started; bind interfaces and routes first, then call
/// `run` on it.
pub fn dummy_stack(
    hwaddr: MacAddr,
) -> (
    NetworkStack,
    Arc<NetworkDevice>,
    InjectHandle,
    Receiver<Vec<u8>>,
) {
    let stack = NetworkStack::new();
    let (tx, rx) = mpsc::channel();
    let dev = stack
        .core()
        .register_device(|index, name| {
            NetworkDevice::with_driver(
                index,
                name,
                DeviceKind::Ethernet,
                ethernet::PAYLOAD_SIZE_MAX,
                ethernet::HEADER_SIZE,
                ethernet::ADDR_LEN,
                hwaddr,
                MacAddr::broadcast(),
                device::FLAG_BROADCAST | device::FLAG_NEED_ARP,
                Box::new(MockLink {
                    frames: Mutex::new(tx),
                }),
            )
        })
        .expect("a fresh stack accepts devices");
    let handle = InjectHandle {
        core: stack.core().clone(),
        dev: dev.clone(),
    };
    (stack, dev, handle, rx)
}
