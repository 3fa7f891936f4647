//! TMU Core Library
//!
//! Thermal monitoring and throttling engine for Exynos-class thermal
//! management units.
//!
//! # Module Structure
//!
//! - `calibration` - Celsius to sensor code conversion from trim fuses
//! - `hw/` - Register access, threshold packing, per-SoC variants
//! - `data/` - Data types, configuration, validation
//! - `engine/` - Controller, interrupt bridge, cooling, registry
//! - `zone` - Thermal zone abstraction consumed by the engine
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tmu_core::{
//!     CoolingCoordinator, SensorDescriptor, SimulatedTmu, SoftIrqLine, StaticZone, ThermalDevice,
//!     AggregationPolicy, PlatformData, SensorMask, VariantTag,
//! };
//!
//! let descriptor = SensorDescriptor {
//!     id: 0,
//!     name: "cpu".into(),
//!     sensors: SensorMask::single(),
//!     aggregation: AggregationPolicy::Passthrough,
//!     variant: VariantTag::Exynos8890,
//!     platform: PlatformData::default(),
//! };
//! let device = ThermalDevice::probe(
//!     &descriptor,
//!     Arc::new(SimulatedTmu::with_trims(&[50])),
//!     Arc::new(SoftIrqLine::new()),
//!     Arc::new(StaticZone::new("cpu", "step_wise", vec![])),
//!     CoolingCoordinator::detached(),
//! )
//! .unwrap();
//! let millicelsius = device.read_temperature().unwrap();
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod calibration;
pub mod constants;
pub mod zone;

pub use calibration::{BufferBias, CalibrationParameters, CalibrationSet, CalibrationType};

// Re-export data types, config and validation
pub use data::{
    find_config_path, load_config, parse_config, validate_config, validate_file_size,
    validate_zone_name, AggregationPolicy, BackendConfig, CoolingConfig, CoolingKind,
    DeviceConfig, DeviceSnapshot, DeviceState, HotplugConfig, HotplugPolicy, Lifecycle,
    PlatformData, SensorDescriptor, SensorMask, TmuConfig, TripConfig, TripPoint, TripTable,
    VariantTag, ZoneConfig, ZoneEvent,
};

// Re-export engine types
pub use engine::{
    CoolingActuator, CoolingCoordinator, CpuHotplug, DeferredWork, DeviceRegistry, FireOutcome,
    HotplugAction, HotplugLatch, IrqBridge, IrqHandle, IrqLine, IrqState, IrqStats,
    SensorController, SoftIrqLine, SuspendGate, ThermalDevice,
};

// Re-export hardware access
pub use hw::{open_backend, DevMemWindow, RegisterIo, SimulatedTmu, TmuVariant};

pub use zone::{StaticZone, TemperatureSource, ThermalZone};

// Re-export error types
pub use tmu_error::{Result, TmuError};
