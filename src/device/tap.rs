//! Ethernet over a Linux TAP device. The stack reads and writes raw frames
//! on a `/dev/net/tun` descriptor opened in `IFF_TAP | IFF_NO_PI` mode. A
//! watcher thread turns readability of the descriptor into an IRQ event for
//! the dispatcher, which then runs the driver poll on its own thread.

use std::ffi::CString;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pnet::packet::ethernet::EtherType;
use pnet::util::MacAddr;

use crate::device::{self, DeviceDriver, DeviceKind, NetworkDevice};
use crate::dispatch::Event;
use crate::errors::{RxResult, TxError, TxResult};
use crate::ethernet;
use crate::stack::{StackCore, StackResult};

/// IRQ numbers handed to the dispatcher are `base + device index`.
const TAP_IRQ_BASE: u32 = 1;

/// How long the watcher sleeps in `poll(2)` before rechecking the closed
/// flag, and how long it backs off after signalling an IRQ so a busy wire
/// cannot starve the dispatcher channel.
const WATCH_TIMEOUT_MS: libc::c_int = 100;
const WATCH_BACKOFF: Duration = Duration::from_millis(1);

struct TapLink {
    fd: libc::c_int,
    closed: Arc<AtomicBool>,
}

impl DeviceDriver for TapLink {
    fn open(&self, core: &StackCore, dev: &Arc<NetworkDevice>) -> io::Result<()> {
        let fd = self.fd;
        let irq = TAP_IRQ_BASE + dev.index();
        let closed = self.closed.clone();
        let tx = core.dispatch.sender();
        thread::Builder::new()
            .name(format!("ustack-tap-{}", dev.name()))
            .spawn(move || watch(fd, irq, closed, tx))?;
        Ok(())
    }

    fn close(&self, _dev: &NetworkDevice) -> io::Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn transmit(
        &self,
        _core: &StackCore,
        dev: &Arc<NetworkDevice>,
        ether_type: EtherType,
        data: &[u8],
        dst: MacAddr,
    ) -> TxResult {
        let frame = ethernet::build_frame(dev.hwaddr(), dst, ether_type, data);
        let n = unsafe { libc::write(self.fd, frame.as_ptr() as *const _, frame.len()) };
        if n < 0 {
            return Err(TxError::Io(io::Error::last_os_error()));
        }
        if (n as usize) != frame.len() {
            return Err(TxError::Other(format!(
                "short write to tap: {} of {}",
                n,
                frame.len()
            )));
        }
        Ok(())
    }

    fn poll(&self, core: &StackCore, dev: &Arc<NetworkDevice>) -> RxResult {
        // The descriptor is non-blocking; drain everything that is ready.
        let mut buffer = [0u8; 2048];
        loop {
            let n = unsafe { libc::read(self.fd, buffer.as_mut_ptr() as *mut _, buffer.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => return Ok(()),
                    _ => {
                        error!("read failed, dev={}: {}", dev.name(), err);
                        return Ok(());
                    }
                }
            }
            if n == 0 {
                return Ok(());
            }
            if let Err(e) = ethernet::frame_input(core, dev, &buffer[..n as usize]) {
                debug!("dev={}: frame dropped: {}", dev.name(), e);
            }
        }
    }
}

impl Drop for TapLink {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn watch(fd: libc::c_int, irq: u32, closed: Arc<AtomicBool>, tx: Sender<Event>) {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    while !closed.load(Ordering::Relaxed) {
        pfd.revents = 0;
        let n = unsafe { libc::poll(&mut pfd, 1, WATCH_TIMEOUT_MS) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!("poll failed on tap fd {}: {}", fd, err);
            break;
        }
        if n == 0 {
            continue;
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            break;
        }
        if pfd.revents & libc::POLLIN != 0 {
            if tx.send(Event::Irq(irq)).is_err() {
                break;
            }
            thread::sleep(WATCH_BACKOFF);
        }
    }
    debug!("tap watcher for fd {} is quitting", fd);
}

fn open_tap(name: &str) -> io::Result<libc::c_int> {
    let c_name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "device name contains NUL"))?;
    if c_name.as_bytes_with_nul().len() > libc::IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "device name too long",
        ));
    }
    unsafe {
        let fd = libc::open(
            b"/dev/net/tun\0".as_ptr() as *const libc::c_char,
            libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
        );
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut req: libc::ifreq = mem::zeroed();
        std::ptr::copy_nonoverlapping(
            c_name.as_ptr(),
            req.ifr_name.as_mut_ptr(),
            c_name.as_bytes_with_nul().len(),
        );
        req.ifr_ifru.ifru_flags = (libc::IFF_TAP | libc::IFF_NO_PI) as libc::c_short;
        if libc::ioctl(fd, libc::TUNSETIFF, &mut req) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        Ok(fd)
    }
}

pub(crate) fn register(
    core: &StackCore,
    name: &str,
    hwaddr: MacAddr,
) -> StackResult<Arc<NetworkDevice>> {
    let fd = open_tap(name)?;
    let dev = core.register_device(|index, devname| {
        NetworkDevice::with_driver(
            index,
            devname,
            DeviceKind::Ethernet,
            ethernet::PAYLOAD_SIZE_MAX,
            ethernet::HEADER_SIZE,
            ethernet::ADDR_LEN,
            hwaddr,
            MacAddr::broadcast(),
            device::FLAG_BROADCAST | device::FLAG_NEED_ARP,
            Box::new(TapLink {
                fd,
                closed: Arc::new(AtomicBool::new(false)),
            }),
        )
    })?;
    core.dispatch
        .request_irq(TAP_IRQ_BASE + dev.index(), name, false, &dev)?;
    debug!("initialized, dev={} ({})", dev.name(), name);
    Ok(dev)
}
