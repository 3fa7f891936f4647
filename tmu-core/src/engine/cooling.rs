//! Cooling and throttle coordination
//!
//! A [`CoolingCoordinator`] sits on the read path of one device. Every
//! temperature reading is forwarded to the bound actuator (unless the system
//! is suspending) and, for CPU zones, run through the hotplug band.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::constants::temperature;
use crate::data::{CoolingKind, HotplugPolicy};
use tmu_error::Result;

/// Downstream throttling device (cpufreq, GPU, ISP cooling)
#[cfg_attr(test, mockall::automock)]
pub trait CoolingActuator: Send + Sync {
    fn kind(&self) -> CoolingKind;

    /// Current zone temperature in °C
    fn set_current_temperature(&self, celsius: i32, suspended: bool);

    fn throttle_state(&self) -> u32;

    /// Drop back to the unthrottled state
    fn reset_throttle_state(&self);
}

/// Online CPU count control used by the hotplug band
#[cfg_attr(test, mockall::automock)]
pub trait CpuHotplug: Send + Sync {
    /// Ask for at most `count` CPUs online
    fn request_online_cpus(&self, count: usize) -> Result<()>;

    /// Lift the request; every CPU may come back
    fn restore_default(&self) -> Result<()>;
}

/// Whether the non-boot CPUs are parked.
///
/// A system runs at most one CPU hotplug controller, so production code
/// shares [`HotplugLatch::global`].
#[derive(Debug, Default)]
pub struct HotplugLatch {
    parked: AtomicBool,
}

impl HotplugLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<HotplugLatch>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(HotplugLatch::new())))
    }

    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    fn flip(&self, from: bool) -> bool {
        self.parked
            .compare_exchange(from, !from, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reset(&self) {
        self.parked.store(false, Ordering::Release);
    }
}

/// Process-wide suspend flag.
///
/// Actuator updates run under the gate's lock so that nothing slips in
/// between the neutral suspend report and the flag being raised.
#[derive(Debug, Default)]
pub struct SuspendGate {
    suspended: Mutex<bool>,
}

impl SuspendGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.lock()
    }

    /// Run `f` unless suspended. Returns whether it ran.
    pub fn run_unless_suspended(&self, f: impl FnOnce()) -> bool {
        let suspended = self.suspended.lock();
        if *suspended {
            return false;
        }
        f();
        true
    }

    /// Raise the flag, then run `f` with the flag held
    pub fn enter(&self, f: impl FnOnce()) {
        let mut suspended = self.suspended.lock();
        *suspended = true;
        f();
    }

    pub fn leave(&self) {
        *self.suspended.lock() = false;
    }
}

/// Outcome of one hotplug evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    None,
    Parked,
    Unparked,
}

struct HotplugBinding {
    policy: HotplugPolicy,
    cpus: Arc<dyn CpuHotplug>,
    latch: Arc<HotplugLatch>,
}

/// Binds one zone to its actuator and optional hotplug band
pub struct CoolingCoordinator {
    actuator: Option<Arc<dyn CoolingActuator>>,
    report_temperature: bool,
    hotplug: Option<HotplugBinding>,
    gate: Arc<SuspendGate>,
}

impl std::fmt::Debug for CoolingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoolingCoordinator")
            .field("kind", &self.kind())
            .field("report_temperature", &self.report_temperature)
            .field("hotplug", &self.hotplug.as_ref().map(|h| h.policy))
            .finish()
    }
}

impl CoolingCoordinator {
    pub fn new(gate: Arc<SuspendGate>) -> Self {
        Self {
            actuator: None,
            report_temperature: true,
            hotplug: None,
            gate,
        }
    }

    /// Coordinator with nothing bound
    pub fn detached() -> Self {
        Self::new(Arc::new(SuspendGate::new()))
    }

    pub fn with_actuator(mut self, actuator: Arc<dyn CoolingActuator>, report_temperature: bool) -> Self {
        self.actuator = Some(actuator);
        self.report_temperature = report_temperature;
        self
    }

    pub fn with_hotplug(
        mut self,
        policy: HotplugPolicy,
        cpus: Arc<dyn CpuHotplug>,
        latch: Arc<HotplugLatch>,
    ) -> Self {
        self.hotplug = Some(HotplugBinding { policy, cpus, latch });
        self
    }

    pub fn kind(&self) -> CoolingKind {
        self.actuator
            .as_ref()
            .map_or(CoolingKind::None, |a| a.kind())
    }

    pub fn actuator(&self) -> Option<&Arc<dyn CoolingActuator>> {
        self.actuator.as_ref()
    }

    pub fn gate(&self) -> &Arc<SuspendGate> {
        &self.gate
    }

    /// Latch state, if a hotplug band is bound
    pub fn hotplug_parked(&self) -> Option<bool> {
        self.hotplug.as_ref().map(|h| h.latch.is_parked())
    }

    /// Feed one reading through the actuator and the hotplug band
    pub fn on_temperature(&self, millicelsius: i32) -> HotplugAction {
        let celsius = millicelsius / temperature::MCELSIUS;

        if let Some(actuator) = self.actuator.as_ref().filter(|_| self.report_temperature) {
            let delivered = self
                .gate
                .run_unless_suspended(|| actuator.set_current_temperature(celsius, false));
            if !delivered {
                debug!(celsius, "Suspended; actuator update suppressed");
            }
        }

        match &self.hotplug {
            Some(binding) => self.evaluate_hotplug(binding, celsius),
            None => HotplugAction::None,
        }
    }

    fn evaluate_hotplug(&self, binding: &HotplugBinding, celsius: i32) -> HotplugAction {
        let HotplugBinding { policy, cpus, latch } = binding;

        if latch.is_parked() {
            if celsius >= policy.in_threshold || !latch.flip(true) {
                return HotplugAction::None;
            }
            if let Err(e) = cpus.restore_default() {
                warn!(celsius, error = %e, "Failed to unpark CPUs");
                latch.flip(false);
                return HotplugAction::None;
            }
            if let Some(actuator) = &self.actuator {
                actuator.reset_throttle_state();
            }
            info!(celsius, in_threshold = policy.in_threshold, "CPUs unparked");
            HotplugAction::Unparked
        } else {
            if celsius < policy.out_threshold || !latch.flip(false) {
                return HotplugAction::None;
            }
            if let Err(e) = cpus.request_online_cpus(policy.parked_online) {
                warn!(celsius, error = %e, "Failed to park CPUs");
                latch.flip(true);
                return HotplugAction::None;
            }
            info!(
                celsius,
                out_threshold = policy.out_threshold,
                online = policy.parked_online,
                "CPUs parked"
            );
            HotplugAction::Parked
        }
    }

    /// Neutral report sent while the system enters suspend
    pub fn report_suspend(&self) {
        if let Some(actuator) = &self.actuator {
            actuator.set_current_temperature(0, true);
        }
    }

    /// Undo any parking before the device goes away
    pub fn release(&self) {
        if let Some(binding) = &self.hotplug {
            if binding.latch.flip(true) {
                if let Err(e) = binding.cpus.restore_default() {
                    warn!(error = %e, "Failed to restore CPUs on release");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serial_test::serial;
    use tmu_error::TmuError;

    fn policy() -> HotplugPolicy {
        HotplugPolicy::new(60, 70, 4).unwrap()
    }

    #[test]
    fn test_hotplug_band_parks_and_unparks_once() {
        let mut cpus = MockCpuHotplug::new();
        cpus.expect_request_online_cpus()
            .with(eq(4))
            .times(1)
            .returning(|_| Ok(()));
        cpus.expect_restore_default().times(1).returning(|| Ok(()));

        let mut actuator = MockCoolingActuator::new();
        actuator
            .expect_set_current_temperature()
            .times(5)
            .return_const(());
        actuator.expect_reset_throttle_state().times(1).return_const(());

        let latch = Arc::new(HotplugLatch::new());
        let coordinator = CoolingCoordinator::detached()
            .with_actuator(Arc::new(actuator), true)
            .with_hotplug(policy(), Arc::new(cpus), latch.clone());

        let actions: Vec<_> = [50, 65, 72, 68, 59]
            .iter()
            .map(|c| coordinator.on_temperature(c * 1000))
            .collect();

        assert_eq!(
            actions,
            vec![
                HotplugAction::None,
                HotplugAction::None,
                HotplugAction::Parked,
                HotplugAction::None,
                HotplugAction::Unparked,
            ]
        );
        assert!(!latch.is_parked());
    }

    #[test]
    fn test_failed_park_request_leaves_latch_clear() {
        let mut cpus = MockCpuHotplug::new();
        cpus.expect_request_online_cpus()
            .times(2)
            .returning(|_| Err(TmuError::generic("sysfs busy")));

        let latch = Arc::new(HotplugLatch::new());
        let coordinator =
            CoolingCoordinator::detached().with_hotplug(policy(), Arc::new(cpus), latch.clone());

        assert_eq!(coordinator.on_temperature(80_000), HotplugAction::None);
        assert!(!latch.is_parked());
        // Retried on the next reading
        assert_eq!(coordinator.on_temperature(80_000), HotplugAction::None);
    }

    #[test]
    fn test_suspend_gate_suppresses_updates() {
        let mut actuator = MockCoolingActuator::new();
        actuator
            .expect_set_current_temperature()
            .with(eq(0), eq(true))
            .times(1)
            .return_const(());
        actuator
            .expect_set_current_temperature()
            .with(eq(45), eq(false))
            .times(1)
            .return_const(());
        let actuator = Arc::new(actuator);

        let gate = Arc::new(SuspendGate::new());
        let coordinator = CoolingCoordinator::new(gate.clone()).with_actuator(actuator, true);

        gate.enter(|| coordinator.report_suspend());
        coordinator.on_temperature(90_000);
        assert!(gate.is_suspended());

        gate.leave();
        coordinator.on_temperature(45_500);
    }

    #[test]
    fn test_report_temperature_disabled() {
        let mut actuator = MockCoolingActuator::new();
        actuator.expect_set_current_temperature().never();
        actuator.expect_kind().return_const(CoolingKind::GpuFreq);

        let coordinator = CoolingCoordinator::detached().with_actuator(Arc::new(actuator), false);
        coordinator.on_temperature(50_000);
        assert_eq!(coordinator.kind(), CoolingKind::GpuFreq);
        assert_eq!(coordinator.hotplug_parked(), None);
    }

    #[test]
    #[serial]
    fn test_global_latch_is_shared() {
        let make = || {
            let mut cpus = MockCpuHotplug::new();
            cpus.expect_request_online_cpus().returning(|_| Ok(()));
            cpus.expect_restore_default().returning(|| Ok(()));
            CoolingCoordinator::detached().with_hotplug(policy(), Arc::new(cpus), HotplugLatch::global())
        };
        HotplugLatch::global().reset();

        let first = make();
        let second = make();
        assert_eq!(first.on_temperature(75_000), HotplugAction::Parked);
        assert_eq!(second.hotplug_parked(), Some(true));
        assert_eq!(second.on_temperature(75_000), HotplugAction::None);

        second.release();
        assert_eq!(first.hotplug_parked(), Some(false));
        HotplugLatch::global().reset();
    }
}
