//! One probed TMU instance
//!
//! Ties the sensor controller, the bound zone, the cooling coordinator and
//! the interrupt bridge together. The interrupt worker reports to the zone
//! first (no device lock held), then clears pending bits under the lock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::controller::SensorController;
use super::cooling::CoolingCoordinator;
use super::irq::{DeferredWork, FireOutcome, IrqBridge, IrqHandle, IrqLine, IrqStats};
use crate::data::{DeviceSnapshot, DeviceState, SensorDescriptor, ZoneEvent};
use crate::hw::RegisterIo;
use crate::zone::{trip_level, TemperatureSource, ThermalZone};
use tmu_error::{Result, TmuError};

struct DeviceCore {
    id: u32,
    name: String,
    controller: SensorController,
    zone: RwLock<Option<Arc<dyn ThermalZone>>>,
    coordinator: CoolingCoordinator,
    last_temperature: Mutex<Option<i32>>,
}

impl DeviceCore {
    fn zone(&self) -> Option<Arc<dyn ThermalZone>> {
        self.zone.read().clone()
    }

    fn bound_zone(&self) -> Result<Arc<dyn ThermalZone>> {
        self.zone()
            .ok_or_else(|| TmuError::ZoneNotBound(self.name.clone()))
    }

    /// Push the interrupt to the zone: synchronous update, then trip level
    fn report_trigger(&self) {
        let Some(zone) = self.zone() else {
            error!(device = %self.name, error = %TmuError::ZoneNotBound(self.name.clone()), "Dropping trip report");
            return;
        };

        match zone.update(self) {
            Ok(temperature_mc) => zone.notify(ZoneEvent {
                zone: zone.name().to_string(),
                trip_level: trip_level(zone.as_ref(), temperature_mc),
                temperature_mc,
            }),
            Err(e) => warn!(device = %self.name, error = %e, "Zone update after interrupt failed"),
        }
    }
}

impl TemperatureSource for DeviceCore {
    fn read_temperature(&self) -> Result<i32> {
        let temperature = self.controller.read_temperature()?;
        self.coordinator.on_temperature(temperature);
        *self.last_temperature.lock() = Some(temperature);
        Ok(temperature)
    }
}

impl DeferredWork for DeviceCore {
    fn run(&self) {
        self.report_trigger();
        self.controller.clear_interrupts();
    }
}

/// A probed device with its interrupt worker running
pub struct ThermalDevice {
    core: Arc<DeviceCore>,
    bridge: IrqBridge,
}

impl std::fmt::Debug for ThermalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThermalDevice")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl ThermalDevice {
    /// Initialize, start the interrupt worker, then enable the hardware.
    ///
    /// The line only sees interrupts once thresholds are programmed.
    pub fn probe(
        descriptor: &SensorDescriptor,
        io: Arc<dyn RegisterIo>,
        line: Arc<dyn IrqLine>,
        zone: Arc<dyn ThermalZone>,
        coordinator: CoolingCoordinator,
    ) -> Result<Self> {
        let controller = SensorController::new(descriptor, io);
        controller.initialize(zone.as_ref())?;

        let core = Arc::new(DeviceCore {
            id: descriptor.id,
            name: descriptor.name.clone(),
            controller,
            zone: RwLock::new(Some(Arc::clone(&zone))),
            coordinator,
            last_temperature: Mutex::new(None),
        });

        let work: Arc<dyn DeferredWork> = core.clone();
        let bridge = IrqBridge::spawn(&descriptor.name, work, line)?;

        core.controller.set_enabled(true, zone.as_ref())?;
        info!(
            device = %descriptor.name,
            id = descriptor.id,
            variant = %descriptor.variant,
            zone = zone.name(),
            cooling = %core.coordinator.kind(),
            "TMU probed"
        );

        Ok(Self { core, bridge })
    }

    pub fn id(&self) -> u32 {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn controller(&self) -> &SensorController {
        &self.core.controller
    }

    pub fn coordinator(&self) -> &CoolingCoordinator {
        &self.core.coordinator
    }

    pub fn zone(&self) -> Option<Arc<dyn ThermalZone>> {
        self.core.zone()
    }

    pub fn bind_zone(&self, zone: Arc<dyn ThermalZone>) {
        *self.core.zone.write() = Some(zone);
    }

    pub fn unbind_zone(&self) -> Option<Arc<dyn ThermalZone>> {
        self.core.zone.write().take()
    }

    /// Aggregated temperature through the cooling path
    pub fn read_temperature(&self) -> Result<i32> {
        self.core.read_temperature()
    }

    pub fn read_channel_temperature(&self, channel: usize) -> Result<i32> {
        self.core.controller.read_channel_temperature(channel)
    }

    pub fn set_emulation(&self, millicelsius: i32) -> Result<()> {
        self.core.controller.set_emulation(millicelsius)
    }

    /// Synchronous zone update, as the poll loop performs it
    pub fn poll(&self) -> Result<i32> {
        self.core.bound_zone()?.update(self.core.as_ref())
    }

    /// Deliver a hardware interrupt
    pub fn fire_interrupt(&self) -> FireOutcome {
        self.bridge.fire()
    }

    pub fn irq_handle(&self) -> IrqHandle {
        self.bridge.handle()
    }

    pub fn irq_stats(&self) -> IrqStats {
        self.bridge.stats()
    }

    pub fn wait_irq_idle(&self, timeout: Duration) -> bool {
        self.bridge.wait_idle(timeout)
    }

    pub fn state(&self) -> DeviceState {
        DeviceState {
            hotplug_parked: self.core.coordinator.hotplug_parked(),
            ..self.core.controller.state()
        }
    }

    /// Neutral report to the actuator while the system suspends
    pub fn report_suspend(&self) {
        self.core.coordinator.report_suspend();
    }

    pub fn suspend(&self) {
        self.core.controller.suspend();
        debug!(device = %self.core.name, "Suspended");
    }

    /// Re-run initialize and enable against the bound zone
    pub fn resume(&self) -> Result<()> {
        let zone = self.core.bound_zone()?;
        self.core.controller.resume(zone.as_ref())?;
        debug!(device = %self.core.name, "Resumed");
        Ok(())
    }

    /// Disable, wait for in-flight interrupt work, then unbind
    pub fn remove(&self) {
        self.core.controller.shut_down();
        self.bridge.shutdown();
        self.unbind_zone();
        self.core.coordinator.release();
        info!(device = %self.core.name, "TMU removed");
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let controller = &self.core.controller;
        let hw = controller.hw();
        DeviceSnapshot {
            id: self.core.id,
            name: self.core.name.clone(),
            variant: controller.variant().tag().to_string(),
            sensors: hw.sensors.bits(),
            aggregation: hw.aggregation.as_str().to_string(),
            state: self.state(),
            passive: controller.is_passive(),
            cooling: self.core.coordinator.kind(),
            last_temperature_mc: *self.core.last_temperature.lock(),
        }
    }
}
