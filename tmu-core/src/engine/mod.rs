//! Runtime engine
//!
//! Sensor controller, interrupt bridge, cooling coordination and the device
//! registry.

mod controller;
mod cooling;
mod device;
pub mod irq;
mod registry;

pub use controller::SensorController;
pub use cooling::{
    CoolingActuator, CoolingCoordinator, CpuHotplug, HotplugAction, HotplugLatch, SuspendGate,
};
pub use device::ThermalDevice;
pub use irq::{DeferredWork, FireOutcome, IrqBridge, IrqHandle, IrqLine, IrqState, IrqStats, SoftIrqLine};
pub use registry::DeviceRegistry;
