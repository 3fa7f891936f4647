//! Interrupt to deferred-work bridge
//!
//! One bridge per device, with a dedicated worker thread and a queue of
//! depth one. The state machine lives in a single atomic:
//!
//! ```text
//! Idle --fire--> Masked --> WorkScheduled --worker--> Running --done--> Idle
//!                                          Running <--fire--> Requeued
//!                                    any --shutdown--> Disabled
//! ```
//!
//! [`IrqHandle::fire`] is what the interrupt source calls. It never blocks
//! and never touches the device lock: it masks the line, publishes the work
//! and unparks the worker. While work is outstanding further interrupts are
//! coalesced. The worker runs the [`DeferredWork`] (which may block), then
//! unmasks the line while it still owns the state and only afterwards
//! returns to `Idle`, so a racing fire can never be undone by a stale
//! unmask. An interrupt that lands between the unmask and `Idle` leaves the
//! bridge `Requeued` and the worker masks again and reruns the work.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use tmu_error::Result;

/// Work executed by the bridge worker after an interrupt
pub trait DeferredWork: Send + Sync {
    fn run(&self);
}

/// Hardware interrupt line control
pub trait IrqLine: Send + Sync {
    /// Mask without waiting for running handlers
    fn disable_nosync(&self);

    fn enable(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IrqState {
    Idle = 0,
    Masked = 1,
    WorkScheduled = 2,
    Running = 3,
    /// Running, with an interrupt delivered after the line was unmasked
    Requeued = 4,
    Disabled = 5,
}

impl IrqState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Masked,
            2 => Self::WorkScheduled,
            3 => Self::Running,
            4 => Self::Requeued,
            _ => Self::Disabled,
        }
    }
}

/// Result of delivering one interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Scheduled,
    /// Work already outstanding; the edge is folded into it
    Coalesced,
    /// Bridge shut down
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqStats {
    pub fired: u64,
    pub coalesced: u64,
    pub handled: u64,
    pub reenabled: u64,
}

struct Shared {
    state: AtomicU8,
    fired: AtomicU64,
    coalesced: AtomicU64,
    handled: AtomicU64,
    reenabled: AtomicU64,
    line: Arc<dyn IrqLine>,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
}

impl Shared {
    fn state(&self) -> IrqState {
        IrqState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: IrqState, to: IrqState) -> std::result::Result<(), IrqState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(IrqState::from_u8)
    }

    fn notify_idle(&self) {
        let _guard = self.idle_lock.lock();
        self.idle_cv.notify_all();
    }
}

/// Cloneable entry point for interrupt sources
#[derive(Clone)]
pub struct IrqHandle {
    shared: Arc<Shared>,
    worker: Thread,
}

impl fmt::Debug for IrqHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqHandle")
            .field("state", &self.shared.state())
            .finish()
    }
}

impl IrqHandle {
    /// Deliver one hardware interrupt. Non-blocking.
    pub fn fire(&self) -> FireOutcome {
        let shared = &self.shared;
        shared.fired.fetch_add(1, Ordering::Relaxed);

        let mut current = shared.state();
        loop {
            let next = match current {
                IrqState::Idle => IrqState::Masked,
                IrqState::Running => IrqState::Requeued,
                IrqState::Disabled => return FireOutcome::Ignored,
                IrqState::Masked | IrqState::WorkScheduled | IrqState::Requeued => {
                    shared.coalesced.fetch_add(1, Ordering::Relaxed);
                    return FireOutcome::Coalesced;
                }
            };
            match shared.transition(current, next) {
                Ok(()) if next == IrqState::Masked => break,
                Ok(()) => {
                    shared.coalesced.fetch_add(1, Ordering::Relaxed);
                    return FireOutcome::Coalesced;
                }
                Err(actual) => current = actual,
            }
        }

        shared.line.disable_nosync();

        if shared
            .transition(IrqState::Masked, IrqState::WorkScheduled)
            .is_err()
        {
            return FireOutcome::Ignored;
        }
        self.worker.unpark();
        FireOutcome::Scheduled
    }

    pub fn state(&self) -> IrqState {
        self.shared.state()
    }
}

/// Owner of the worker thread
pub struct IrqBridge {
    name: String,
    handle: IrqHandle,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for IrqBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqBridge")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl IrqBridge {
    pub fn spawn(name: &str, work: Arc<dyn DeferredWork>, line: Arc<dyn IrqLine>) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(IrqState::Idle as u8),
            fired: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            handled: AtomicU64::new(0),
            reenabled: AtomicU64::new(0),
            line,
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_name = name.to_string();
        let join = thread::Builder::new()
            .name(format!("tmu-irq-{}", name))
            .spawn(move || worker_loop(&worker_name, &worker_shared, work.as_ref()))?;

        debug!(device = name, "Interrupt worker started");
        Ok(Self {
            name: name.to_string(),
            handle: IrqHandle {
                shared,
                worker: join.thread().clone(),
            },
            join: Mutex::new(Some(join)),
        })
    }

    pub fn handle(&self) -> IrqHandle {
        self.handle.clone()
    }

    pub fn fire(&self) -> FireOutcome {
        self.handle.fire()
    }

    pub fn state(&self) -> IrqState {
        self.handle.state()
    }

    pub fn stats(&self) -> IrqStats {
        let s = &self.handle.shared;
        IrqStats {
            fired: s.fired.load(Ordering::Relaxed),
            coalesced: s.coalesced.load(Ordering::Relaxed),
            handled: s.handled.load(Ordering::Relaxed),
            reenabled: s.reenabled.load(Ordering::Relaxed),
        }
    }

    /// Wait until no work is outstanding. False on timeout or shutdown.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.handle.shared;
        let deadline = Instant::now() + timeout;
        let mut guard = shared.idle_lock.lock();
        loop {
            match shared.state() {
                IrqState::Idle => return true,
                IrqState::Disabled => return false,
                _ => {}
            }
            if shared.idle_cv.wait_until(&mut guard, deadline).timed_out() {
                return shared.state() == IrqState::Idle;
            }
        }
    }

    /// Stop accepting interrupts and join the worker, letting an in-flight
    /// work item finish first. Idempotent.
    pub fn shutdown(&self) {
        let shared = &self.handle.shared;
        let previous = IrqState::from_u8(shared.state.swap(IrqState::Disabled as u8, Ordering::AcqRel));
        if matches!(previous, IrqState::Masked | IrqState::WorkScheduled | IrqState::Requeued) {
            debug!(device = %self.name, "Dropping pending interrupt work at shutdown");
        }
        self.handle.worker.unpark();
        shared.notify_idle();

        let Some(join) = self.join.lock().take() else {
            return;
        };
        if join.thread().id() == thread::current().id() {
            warn!(device = %self.name, "Interrupt bridge shut down from its own worker");
            return;
        }
        if join.join().is_err() {
            warn!(device = %self.name, "Interrupt worker panicked");
        }
        debug!(device = %self.name, "Interrupt worker stopped");
    }
}

impl Drop for IrqBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(name: &str, shared: &Shared, work: &dyn DeferredWork) {
    loop {
        match shared.transition(IrqState::WorkScheduled, IrqState::Running) {
            Ok(()) => {
                run_until_idle(name, shared, work);
                shared.notify_idle();
            }
            Err(IrqState::Disabled) => break,
            Err(_) => thread::park(),
        }
    }
}

/// Run the work, then unmask and return to `Idle`. The line is only ever
/// unmasked while the worker owns the state.
fn run_until_idle(name: &str, shared: &Shared, work: &dyn DeferredWork) {
    loop {
        trace!(device = name, "Running deferred interrupt work");
        work.run();
        shared.handled.fetch_add(1, Ordering::Relaxed);

        // Edges delivered while masked are covered by the run that just ended
        let _ = shared.transition(IrqState::Requeued, IrqState::Running);
        if shared.state() == IrqState::Disabled {
            return;
        }

        shared.line.enable();
        shared.reenabled.fetch_add(1, Ordering::Relaxed);

        match shared.transition(IrqState::Running, IrqState::Idle) {
            Ok(()) => return,
            Err(IrqState::Requeued) => {
                shared.line.disable_nosync();
                if shared.transition(IrqState::Requeued, IrqState::Running).is_err() {
                    return;
                }
                trace!(device = name, "Interrupt arrived during unmask, running again");
            }
            Err(_) => {
                shared.line.disable_nosync();
                return;
            }
        }
    }
}

/// Interrupt line with no hardware behind it; records mask operations
#[derive(Debug)]
pub struct SoftIrqLine {
    enabled: AtomicBool,
    disables: AtomicU64,
    enables: AtomicU64,
}

impl Default for SoftIrqLine {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disables: AtomicU64::new(0),
            enables: AtomicU64::new(0),
        }
    }
}

impl SoftIrqLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn disable_count(&self) -> u64 {
        self.disables.load(Ordering::Relaxed)
    }

    pub fn enable_count(&self) -> u64 {
        self.enables.load(Ordering::Relaxed)
    }
}

impl IrqLine for SoftIrqLine {
    fn disable_nosync(&self) {
        self.enabled.store(false, Ordering::Release);
        self.disables.fetch_add(1, Ordering::Relaxed);
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        self.enables.fetch_add(1, Ordering::Relaxed);
    }
}
