//! Data types, configuration, and validation modules

mod config;
mod types;
mod validation;

pub use config::{
    find_config_path, load_config, parse_config, BackendConfig, CoolingConfig, DeviceConfig,
    HotplugConfig, TmuConfig, TripConfig, ZoneConfig,
};
pub use types::{
    AggregationPolicy, CoolingKind, DeviceSnapshot, DeviceState, HotplugPolicy, Lifecycle,
    PlatformData, SensorDescriptor, SensorMask, TripPoint, TripTable, VariantTag, ZoneEvent,
};
pub use validation::{validate_config, validate_file_size, validate_zone_name};
