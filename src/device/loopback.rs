//! The software loopback device. Transmit feeds the bytes straight back
//! into the stack input handler, so frames never leave the process and no
//! header or link address is involved.

use std::sync::Arc;

use pnet::packet::ethernet::EtherType;
use pnet::util::MacAddr;

use crate::device::{self, DeviceDriver, DeviceKind, NetworkDevice};
use crate::errors::TxResult;
use crate::stack::{StackCore, StackResult};

/// A whole IP datagram must fit in one loopback "frame".
const LOOPBACK_MTU: usize = u16::MAX as usize;

struct LoopbackLink;

impl DeviceDriver for LoopbackLink {
    fn transmit(
        &self,
        core: &StackCore,
        dev: &Arc<NetworkDevice>,
        ether_type: EtherType,
        data: &[u8],
        _dst: MacAddr,
    ) -> TxResult {
        debug!(
            "dev={}, type=0x{:04x}, len={}",
            dev.name(),
            ether_type.0,
            data.len()
        );
        let _ = core.input(ether_type, data, dev);
        Ok(())
    }
}

pub(crate) fn register(core: &StackCore) -> StackResult<Arc<NetworkDevice>> {
    let dev = core.register_device(|index, name| {
        NetworkDevice::with_driver(
            index,
            name,
            DeviceKind::Loopback,
            LOOPBACK_MTU,
            0,
            0,
            MacAddr::zero(),
            MacAddr::zero(),
            device::FLAG_LOOPBACK,
            Box::new(LoopbackLink),
        )
    })?;
    debug!("initialized, dev={}", dev.name());
    Ok(dev)
}
