//! Sensor controller
//!
//! Owns the per-device lock. Every register access and every change to
//! [`DeviceState`] happens while holding it. The lock is never held while
//! calling into a zone: trip snapshots and validity masks are gathered before
//! it is taken.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationSet;
use crate::constants::temperature;
use crate::data::{DeviceState, Lifecycle, SensorDescriptor, TripTable};
use crate::hw::{interrupt_enable_mask, variant_for, RegisterIo, TmuHw, TmuVariant};
use crate::zone::{trip_table, ThermalZone};
use std::sync::Arc;
use tmu_error::{Result, TmuError};

#[derive(Debug, Default)]
struct Guarded {
    state: DeviceState,
    calibration: Option<CalibrationSet>,
    trips: TripTable,
    passive: bool,
}

/// Lock-protected front end of one TMU instance
#[derive(Debug)]
pub struct SensorController {
    name: String,
    variant: Box<dyn TmuVariant>,
    hw: TmuHw,
    inner: Mutex<Guarded>,
}

impl SensorController {
    pub fn new(descriptor: &SensorDescriptor, io: Arc<dyn RegisterIo>) -> Self {
        let variant = variant_for(descriptor.variant);
        debug!(device = %descriptor.name, variant = %descriptor.variant, "Selected TMU variant");
        Self {
            name: descriptor.name.clone(),
            variant,
            hw: TmuHw {
                io,
                sensors: descriptor.sensors,
                aggregation: descriptor.aggregation,
                platform: descriptor.platform,
            },
            inner: Mutex::new(Guarded::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hw(&self) -> &TmuHw {
        &self.hw
    }

    pub fn variant(&self) -> &dyn TmuVariant {
        self.variant.as_ref()
    }

    /// Resolve calibration, snapshot trips, program thresholds and clear
    /// pending interrupts. Safe to repeat; resume relies on it.
    pub fn initialize(&self, zone: &dyn ThermalZone) -> Result<()> {
        let trips = trip_table(zone)?;
        let passive = zone.is_passive();

        let mut inner = self.inner.lock();
        if inner.state.stage == Lifecycle::Removed {
            return Err(TmuError::not_ready(format!("{} has been removed", self.name)));
        }

        let calibration = self.variant.initialize(&self.hw, &trips, passive)?;
        info!(
            device = %self.name,
            trips = trips.len(),
            passive,
            calibration = ?calibration.primary.kind,
            "TMU initialized"
        );

        inner.calibration = Some(calibration);
        inner.trips = trips;
        inner.passive = passive;
        inner.state.stage = Lifecycle::Initialized;
        inner.state.enabled = false;
        Ok(())
    }

    /// Start or stop sampling and interrupts.
    ///
    /// Enabling derives INTEN from the zone's valid trips, rising and falling.
    pub fn set_enabled(&self, on: bool, zone: &dyn ThermalZone) -> Result<()> {
        let mask = interrupt_enable_mask(|i| zone.is_trip_valid(i));

        let mut inner = self.inner.lock();
        let Guarded {
            state,
            calibration,
            passive,
            ..
        } = &mut *inner;

        let calibration = match calibration {
            Some(cal) => cal,
            None if on => {
                return Err(TmuError::not_ready(format!("{} is not initialized", self.name)))
            }
            None => return Ok(()),
        };

        self.variant.set_enabled(&self.hw, calibration, on, mask, *passive);
        state.enabled = on;
        state.stage = if on {
            Lifecycle::Enabled
        } else {
            Lifecycle::Initialized
        };
        debug!(device = %self.name, on, inten = %format!("{:#010x}", mask), "TMU run state changed");
        Ok(())
    }

    /// Current aggregated temperature in m°C
    pub fn read_temperature(&self) -> Result<i32> {
        let inner = self.inner.lock();
        let calibration = inner
            .calibration
            .as_ref()
            .ok_or_else(|| TmuError::not_ready(format!("{} is not initialized", self.name)))?;

        let code = self.variant.read_raw(&self.hw);
        Ok(calibration.primary.celsius_from_code(code) * temperature::MCELSIUS)
    }

    /// Temperature of one physical channel, using that channel's own trim
    pub fn read_channel_temperature(&self, channel: usize) -> Result<i32> {
        let inner = self.inner.lock();
        let calibration = inner
            .calibration
            .as_ref()
            .ok_or_else(|| TmuError::not_ready(format!("{} is not initialized", self.name)))?;

        let code = self.variant.read_channel(&self.hw, channel).ok_or_else(|| {
            TmuError::invalid_argument(format!("channel {} is not active on {}", channel, self.name))
        })?;
        Ok(calibration.for_channel(channel).celsius_from_code(code) * temperature::MCELSIUS)
    }

    /// Force the readout to `millicelsius`; 0 releases the override
    pub fn set_emulation(&self, millicelsius: i32) -> Result<()> {
        if millicelsius != 0 && millicelsius < temperature::MIN_EMULATION_MC {
            return Err(TmuError::invalid_argument(format!(
                "emulation value {} m°C is below {} m°C",
                millicelsius,
                temperature::MIN_EMULATION_MC
            )));
        }

        let mut inner = self.inner.lock();
        let Guarded {
            state, calibration, ..
        } = &mut *inner;
        let calibration = calibration
            .as_ref()
            .ok_or_else(|| TmuError::not_ready(format!("{} is not initialized", self.name)))?;

        self.variant
            .set_emulation(&self.hw, &calibration.primary, millicelsius)?;
        state.emulation_mc = (millicelsius != 0).then_some(millicelsius);
        info!(device = %self.name, millicelsius, "Emulation updated");
        Ok(())
    }

    /// Acknowledge every pending interrupt
    pub fn clear_interrupts(&self) {
        let _inner = self.inner.lock();
        self.variant.clear_interrupts(&self.hw);
    }

    /// Stop sampling and interrupts, keeping calibration and trips
    pub fn suspend(&self) {
        let mut inner = self.inner.lock();
        let Guarded {
            state, calibration, ..
        } = &mut *inner;

        match calibration {
            Some(cal) => self.variant.set_enabled(&self.hw, cal, false, 0, false),
            None => warn!(device = %self.name, "Suspending an uninitialized TMU"),
        }
        state.enabled = false;
        state.suspended = true;
        if state.stage != Lifecycle::Uninitialized {
            state.stage = Lifecycle::Suspended;
        }
    }

    /// Re-run initialize and enable after a suspend
    pub fn resume(&self, zone: &dyn ThermalZone) -> Result<()> {
        self.initialize(zone)?;
        self.set_enabled(true, zone)?;
        self.inner.lock().state.suspended = false;
        Ok(())
    }

    /// Final disable before teardown
    pub fn shut_down(&self) {
        let mut inner = self.inner.lock();
        if let Some(cal) = inner.calibration.as_ref() {
            self.variant.set_enabled(&self.hw, cal, false, 0, false);
        }
        inner.state.enabled = false;
        inner.state.stage = Lifecycle::Removed;
    }

    pub fn state(&self) -> DeviceState {
        self.inner.lock().state.clone()
    }

    pub fn is_passive(&self) -> bool {
        self.inner.lock().passive
    }

    /// Trips programmed by the last initialize
    pub fn trips(&self) -> TripTable {
        self.inner.lock().trips.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::regs;
    use crate::data::{AggregationPolicy, PlatformData, SensorMask, TripConfig, VariantTag};
    use crate::hw::SimulatedTmu;
    use crate::zone::StaticZone;

    fn descriptor(variant: VariantTag, mask: u8) -> SensorDescriptor {
        SensorDescriptor {
            id: 0,
            name: "tmu0".into(),
            sensors: SensorMask::new(mask).unwrap(),
            aggregation: AggregationPolicy::Max,
            variant,
            platform: PlatformData::default(),
        }
    }

    fn zone(governor: &str) -> StaticZone {
        StaticZone::new(
            "tmu0",
            governor,
            vec![
                TripConfig { temperature_mc: 70_000, hysteresis_mc: 5_000, valid: true },
                TripConfig { temperature_mc: 90_000, hysteresis_mc: 5_000, valid: true },
            ],
        )
    }

    fn controller(sim: &Arc<SimulatedTmu>) -> SensorController {
        SensorController::new(&descriptor(VariantTag::Exynos8890, 1), sim.clone())
    }

    #[test]
    fn test_read_before_initialize_is_not_ready() {
        let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
        let ctl = controller(&sim);
        assert!(matches!(ctl.read_temperature(), Err(TmuError::NotReady(_))));
        assert!(matches!(ctl.set_emulation(40_000), Err(TmuError::NotReady(_))));
        assert!(matches!(ctl.set_enabled(true, &zone("step_wise")), Err(TmuError::NotReady(_))));
    }

    #[test]
    fn test_read_converts_to_millicelsius() {
        let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
        sim.set_channel_code(0, 80);
        let ctl = controller(&sim);
        ctl.initialize(&zone("step_wise")).unwrap();
        assert_eq!(ctl.read_temperature().unwrap(), 55_000);
    }

    #[test]
    fn test_emulation_rejects_sub_degree_values() {
        let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
        let ctl = controller(&sim);
        ctl.initialize(&zone("step_wise")).unwrap();
        let before = sim.peek(regs::EMUL_CON);

        assert!(matches!(ctl.set_emulation(999), Err(TmuError::InvalidArgument(_))));
        assert!(matches!(ctl.set_emulation(-5_000), Err(TmuError::InvalidArgument(_))));
        assert_eq!(sim.peek(regs::EMUL_CON), before);
        assert_eq!(ctl.state().emulation_mc, None);
    }

    #[test]
    fn test_emulation_round_trip() {
        let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
        sim.set_channel_code(0, 60);
        let ctl = controller(&sim);
        ctl.initialize(&zone("step_wise")).unwrap();

        ctl.set_emulation(88_000).unwrap();
        assert_eq!(ctl.read_temperature().unwrap(), 88_000);
        assert_eq!(ctl.state().emulation_mc, Some(88_000));

        ctl.set_emulation(0).unwrap();
        assert_eq!(ctl.read_temperature().unwrap(), 35_000);
        assert_eq!(ctl.state().emulation_mc, None);
    }

    #[test]
    fn test_lifecycle() {
        let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
        let ctl = controller(&sim);
        let zone = zone("step_wise");
        assert_eq!(ctl.state().stage, Lifecycle::Uninitialized);

        ctl.initialize(&zone).unwrap();
        assert_eq!(ctl.state().stage, Lifecycle::Initialized);

        ctl.set_enabled(true, &zone).unwrap();
        assert_eq!(ctl.state().stage, Lifecycle::Enabled);
        assert_eq!(sim.peek(regs::INTEN), 0x0003_0003);

        ctl.suspend();
        let state = ctl.state();
        assert_eq!(state.stage, Lifecycle::Suspended);
        assert!(state.suspended && !state.enabled);
        assert_eq!(sim.peek(regs::INTEN), 0);

        ctl.resume(&zone).unwrap();
        let state = ctl.state();
        assert_eq!(state.stage, Lifecycle::Enabled);
        assert!(!state.suspended && state.enabled);

        ctl.shut_down();
        assert_eq!(ctl.state().stage, Lifecycle::Removed);
        assert!(ctl.initialize(&zone).is_err());
    }

    #[test]
    fn test_passive_zone_programs_nothing() {
        let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
        let ctl = controller(&sim);
        let zone = zone("power_allocator");
        ctl.initialize(&zone).unwrap();
        ctl.set_enabled(true, &zone).unwrap();
        assert!(ctl.is_passive());
        assert_eq!(sim.peek(0x5C), 0);
        assert_eq!(sim.peek(regs::INTEN), 0);
        sim.set_channel_code(0, 70);
        assert_eq!(ctl.read_temperature().unwrap(), 45_000);
    }

    #[test]
    fn test_degenerate_trim_fails_initialize() {
        // Two-point fuse with both codes equal
        let sim = Arc::new(SimulatedTmu::with_trims(&[(1 << 23) | (60 << 9) | 60]));
        let ctl = controller(&sim);
        let err = ctl.initialize(&zone("step_wise")).unwrap_err();
        assert!(err.is_config());
        assert_eq!(ctl.state().stage, Lifecycle::Uninitialized);
    }

    #[test]
    fn test_channel_read_uses_channel_trim() {
        let sim = Arc::new(SimulatedTmu::with_trims(&[50, 0, 60]));
        sim.set_channel_code(0, 80);
        sim.set_channel_code(2, 80);
        let ctl = SensorController::new(&descriptor(VariantTag::Exynos8895, 0b0101), sim.clone());
        ctl.initialize(&zone("step_wise")).unwrap();

        assert_eq!(ctl.read_channel_temperature(0).unwrap(), 55_000);
        assert_eq!(ctl.read_channel_temperature(2).unwrap(), 45_000);
        assert!(matches!(
            ctl.read_channel_temperature(1),
            Err(TmuError::InvalidArgument(_))
        ));
    }
}
