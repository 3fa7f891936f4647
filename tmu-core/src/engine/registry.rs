//! Process-wide list of active devices
//!
//! The registry lock is distinct from every device lock and only guards the
//! list itself. System suspend and resume fan out through it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::cooling::SuspendGate;
use super::device::ThermalDevice;
use crate::data::DeviceSnapshot;
use tmu_error::{Result, TmuError};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<Vec<Arc<ThermalDevice>>>,
    gate: Arc<SuspendGate>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend flag shared with every coordinator built for this registry
    pub fn gate(&self) -> Arc<SuspendGate> {
        Arc::clone(&self.gate)
    }

    pub fn register(&self, device: ThermalDevice) -> Result<Arc<ThermalDevice>> {
        let mut devices = self.devices.lock();
        if devices
            .iter()
            .any(|d| d.name() == device.name() || d.id() == device.id())
        {
            let name = device.name().to_string();
            drop(devices);
            device.remove();
            return Err(TmuError::invalid_config(
                "devices",
                format!("device '{}' is already registered", name),
            ));
        }
        let device = Arc::new(device);
        devices.push(Arc::clone(&device));
        Ok(device)
    }

    /// Remove a device from the list and tear it down
    pub fn unregister(&self, name: &str) -> Result<Arc<ThermalDevice>> {
        let device = {
            let mut devices = self.devices.lock();
            let index = devices
                .iter()
                .position(|d| d.name() == name)
                .ok_or_else(|| TmuError::DeviceNotFound(name.to_string()))?;
            devices.remove(index)
        };
        device.remove();
        Ok(device)
    }

    pub fn get(&self, name: &str) -> Result<Arc<ThermalDevice>> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| TmuError::DeviceNotFound(name.to_string()))
    }

    pub fn get_by_id(&self, id: u32) -> Result<Arc<ThermalDevice>> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.id() == id)
            .cloned()
            .ok_or_else(|| TmuError::DeviceNotFound(format!("id {}", id)))
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.lock().iter().map(|d| d.name().to_string()).collect()
    }

    /// Visit every device with the registry lock held
    pub fn for_each(&self, mut f: impl FnMut(&ThermalDevice)) {
        for device in self.devices.lock().iter() {
            f(device);
        }
    }

    /// Owned copy of the list, for work that should not hold the lock
    pub fn devices(&self) -> Vec<Arc<ThermalDevice>> {
        self.devices.lock().clone()
    }

    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut out = Vec::new();
        self.for_each(|d| out.push(d.snapshot()));
        out
    }

    /// Suspend notifier: raise the flag and send every actuator a neutral
    /// reading
    pub fn prepare_suspend(&self) {
        // Registry lock is not held under the gate
        let devices = self.devices();
        self.gate.enter(|| devices.iter().for_each(|d| d.report_suspend()));
        info!(devices = devices.len(), "Suspend prepared");
    }

    /// Post-suspend notifier: actuator updates flow again
    pub fn post_suspend(&self) {
        self.gate.leave();
        info!("Suspend finished");
    }

    /// Stop sampling and interrupts on every device
    pub fn suspend_all(&self) {
        self.prepare_suspend();
        self.for_each(ThermalDevice::suspend);
    }

    /// Re-initialize every device. Keeps going past failures and returns
    /// the first one.
    pub fn resume_all(&self) -> Result<()> {
        let mut first_error = None;
        for device in self.devices() {
            if let Err(e) = device.resume() {
                warn!(device = device.name(), error = %e, "Resume failed");
                first_error.get_or_insert(e);
            }
        }
        self.post_suspend();
        first_error.map_or(Ok(()), Err)
    }

    /// Tear down every device
    pub fn remove_all(&self) {
        let devices: Vec<_> = self.devices.lock().drain(..).collect();
        for device in devices {
            device.remove();
        }
    }
}
