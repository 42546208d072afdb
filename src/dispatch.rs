//! The soft-IRQ core: a single dispatcher thread multiplexing protocol queue
//! events, a periodic timer tick, wake events and per-device IRQs over one
//! channel. Protocol handlers, timers and event subscribers all run on the
//! dispatcher thread, sequentially, so none of them ever race each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::device::NetworkDevice;
use crate::stack::{StackCore, StackError, StackResult};

/// Granularity of the periodic tick driving the timer list.
const TICK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub(crate) enum Event {
    /// A protocol input queue has data.
    SoftIrq,
    /// Run all event subscribers.
    Wake,
    /// Periodic tick, run due timers.
    Tick,
    /// A device registered under this IRQ number is ready for polling.
    Irq(u32),
    /// Stop the dispatcher thread.
    Shutdown,
}

type Handler = Box<dyn Fn(&StackCore) + Send + Sync>;

struct IrqEntry {
    irq: u32,
    name: String,
    shared: bool,
    dev: Weak<NetworkDevice>,
}

struct Timer {
    name: &'static str,
    interval: Duration,
    last: Mutex<Instant>,
    handler: Handler,
}

pub(crate) struct Dispatcher {
    tx: Sender<Event>,
    rx: Mutex<Option<Receiver<Event>>>,
    irqs: RwLock<Vec<IrqEntry>>,
    timers: RwLock<Vec<Timer>>,
    subscribers: RwLock<Vec<Handler>>,
    ticker_stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        let (tx, rx) = mpsc::channel();
        Dispatcher {
            tx,
            rx: Mutex::new(Some(rx)),
            irqs: RwLock::new(Vec::new()),
            timers: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            ticker_stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Queues an event for the dispatcher thread. Never blocks; events for a
    /// dispatcher that already quit are discarded.
    pub fn raise(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// A sender handle for threads that signal readiness asynchronously,
    /// such as the TAP watcher.
    pub fn sender(&self) -> Sender<Event> {
        self.tx.clone()
    }

    /// Registers `dev` to be polled whenever `irq` fires. An IRQ number may
    /// only be reused if every registration passed `shared`.
    pub fn request_irq(
        &self,
        irq: u32,
        name: &str,
        shared: bool,
        dev: &Arc<NetworkDevice>,
    ) -> StackResult<()> {
        let mut irqs = self.irqs.write().unwrap();
        for entry in irqs.iter() {
            if entry.irq == irq && !(entry.shared && shared) {
                error!("irq {} conflicts with already registered {}", irq, entry.name);
                return Err(StackError::IllegalArgument);
            }
        }
        debug!("irq registered: irq={}, name={}", irq, name);
        irqs.push(IrqEntry {
            irq,
            name: name.to_owned(),
            shared,
            dev: Arc::downgrade(dev),
        });
        Ok(())
    }

    /// Registers a periodic timer. `handler` runs on the dispatcher thread
    /// whenever more than `interval` has passed since it last ran.
    pub fn register_timer<F>(&self, name: &'static str, interval: Duration, handler: F)
    where
        F: Fn(&StackCore) + Send + Sync + 'static,
    {
        info!("timer registered: {} interval={:?}", name, interval);
        self.timers.write().unwrap().push(Timer {
            name,
            interval,
            last: Mutex::new(Instant::now()),
            handler: Box::new(handler),
        });
    }

    /// Subscribes `handler` to wake events raised through [`Event::Wake`].
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&StackCore) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Box::new(handler));
    }

    /// Starts the dispatcher and ticker threads. The dispatcher holds only a
    /// weak reference to the core so a dropped stack lets it exit.
    pub fn spawn(&self, core: &Arc<StackCore>) -> StackResult<()> {
        let rx = match self.rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return Err(StackError::AlreadyRunning),
        };
        let weak = Arc::downgrade(core);
        let dispatcher = thread::Builder::new()
            .name("ustack-dispatch".to_owned())
            .spawn(move || dispatch_loop(rx, weak))?;

        let tick_tx = self.tx.clone();
        let stop = self.ticker_stop.clone();
        let ticker = thread::Builder::new()
            .name("ustack-ticker".to_owned())
            .spawn(move || ticker_loop(tick_tx, stop))?;

        let mut threads = self.threads.lock().unwrap();
        threads.push(dispatcher);
        threads.push(ticker);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.ticker_stop.store(true, Ordering::Relaxed);
        self.raise(Event::Shutdown);
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }

    fn run_timers(&self, core: &StackCore) {
        let now = Instant::now();
        for timer in self.timers.read().unwrap().iter() {
            let mut last = timer.last.lock().unwrap();
            if now.saturating_duration_since(*last) > timer.interval {
                trace!("timer fired: {}", timer.name);
                (timer.handler)(core);
                *last = now;
            }
        }
    }

    fn run_subscribers(&self, core: &StackCore) {
        for handler in self.subscribers.read().unwrap().iter() {
            handler(core);
        }
    }

    fn handle_irq(&self, irq: u32, core: &StackCore) {
        for entry in self.irqs.read().unwrap().iter() {
            if entry.irq != irq {
                continue;
            }
            debug!("irq={}, name={}", entry.irq, entry.name);
            if let Some(dev) = entry.dev.upgrade() {
                dev.poll(core);
            }
        }
    }
}

fn dispatch_loop(rx: Receiver<Event>, core: Weak<StackCore>) {
    while let Ok(event) = rx.recv() {
        let core = match core.upgrade() {
            Some(core) => core,
            None => break,
        };
        match event {
            Event::SoftIrq => core.protocol_handler(),
            Event::Wake => core.dispatch.run_subscribers(&core),
            Event::Tick => core.dispatch.run_timers(&core),
            Event::Irq(irq) => core.dispatch.handle_irq(irq, &core),
            Event::Shutdown => break,
        }
    }
    debug!("dispatcher thread is quitting");
}

fn ticker_loop(tx: Sender<Event>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(TICK_INTERVAL);
        if tx.send(Event::Tick).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{self, DeviceKind};
    use crate::errors::TxResult;
    use pnet::packet::ethernet::EtherType;
    use pnet::util::MacAddr;

    struct NullLink;

    impl device::DeviceDriver for NullLink {
        fn transmit(
            &self,
            _core: &StackCore,
            _dev: &Arc<NetworkDevice>,
            _ether_type: EtherType,
            _data: &[u8],
            _dst: MacAddr,
        ) -> TxResult {
            Ok(())
        }
    }

    fn dummy_device(index: u32) -> Arc<NetworkDevice> {
        Arc::new(NetworkDevice::with_driver(
            index,
            format!("net{}", index),
            DeviceKind::Ethernet,
            1500,
            14,
            6,
            MacAddr::zero(),
            MacAddr::broadcast(),
            device::FLAG_BROADCAST,
            Box::new(NullLink),
        ))
    }

    #[test]
    fn exclusive_irq_conflicts() {
        let dispatch = Dispatcher::new();
        let a = dummy_device(0);
        let b = dummy_device(1);
        dispatch.request_irq(7, "a", false, &a).unwrap();
        assert!(dispatch.request_irq(7, "b", false, &b).is_err());
        assert!(dispatch.request_irq(7, "b", true, &b).is_err());
        dispatch.request_irq(8, "b", false, &b).unwrap();
    }

    #[test]
    fn shared_irq_allowed() {
        let dispatch = Dispatcher::new();
        let a = dummy_device(0);
        let b = dummy_device(1);
        dispatch.request_irq(9, "a", true, &a).unwrap();
        dispatch.request_irq(9, "b", true, &b).unwrap();
        // a later exclusive registration still conflicts
        assert!(dispatch.request_irq(9, "c", false, &a).is_err());
    }
}
