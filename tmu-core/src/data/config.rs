//! Configuration file model
//!
//! The JSON file plays the role of the board description: one entry per TMU
//! instance with its register window, active channels, platform trim data,
//! trip table, cooling binding and optional hotplug band.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{
    AggregationPolicy, CoolingKind, HotplugPolicy, PlatformData, SensorDescriptor, SensorMask,
    TripPoint, VariantTag,
};
use super::validation::{validate_config, validate_file_size};
use crate::constants::{governor, hotplug, paths, regs, timing, CONFIG_VERSION};
use tmu_error::{Result, TmuError};

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmuConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for TmuConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            poll_interval_ms: timing::DEFAULT_POLL_INTERVAL_MS,
            devices: Vec::new(),
        }
    }
}

/// One TMU instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: u32,
    pub name: String,
    pub compatible: String,
    #[serde(default)]
    pub backend: BackendConfig,
    /// UIO node delivering this instance's interrupt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uio: Option<PathBuf>,
    #[serde(default = "default_sensors")]
    pub sensors: u8,
    #[serde(default)]
    pub sensing_method: AggregationPolicy,
    #[serde(default)]
    pub platform: PlatformData,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub cooling: CoolingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotplug: Option<HotplugConfig>,
}

/// Where the register window comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process register file
    Simulated {
        /// TRIMINFO word per channel, index = channel
        #[serde(default)]
        trim: Vec<u32>,
        /// Code every channel reports after start-up
        #[serde(default)]
        initial_code: u16,
    },
    /// Physical window mapped through /dev/mem
    Devmem {
        base_address: u64,
        #[serde(default = "default_window_size")]
        size: u32,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Simulated {
            trim: Vec::new(),
            initial_code: 0,
        }
    }
}

/// Zone definition: governor and trip levels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    #[serde(default = "default_governor")]
    pub governor: String,
    #[serde(default)]
    pub trips: Vec<TripConfig>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            governor: default_governor(),
            trips: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripConfig {
    pub temperature_mc: i32,
    #[serde(default)]
    pub hysteresis_mc: i32,
    #[serde(default = "default_true")]
    pub valid: bool,
}

impl TripConfig {
    pub fn trip_point(&self) -> TripPoint {
        TripPoint::new(self.temperature_mc, self.hysteresis_mc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoolingConfig {
    #[serde(default)]
    pub kind: CoolingKind,
    /// Forward temperature updates to the actuator
    #[serde(default = "default_true")]
    pub report_temperature: bool,
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            kind: CoolingKind::None,
            report_temperature: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugConfig {
    pub in_threshold: i32,
    pub out_threshold: i32,
    /// CPUs taken offline while parked
    #[serde(default)]
    pub cpus: Vec<u32>,
    #[serde(default = "default_parked_online")]
    pub parked_online: usize,
}

impl HotplugConfig {
    pub fn policy(&self) -> Result<HotplugPolicy> {
        HotplugPolicy::new(self.in_threshold, self.out_threshold, self.parked_online)
    }
}

impl DeviceConfig {
    /// Resolve the variant and channel mask into a descriptor
    pub fn descriptor(&self) -> Result<SensorDescriptor> {
        let variant = VariantTag::from_compatible(&self.compatible)?;
        let sensors = SensorMask::new(self.sensors)?;
        if sensors.channels().any(|ch| ch >= variant.max_channels()) {
            return Err(TmuError::invalid_config(
                format!("devices[{}].sensors", self.name),
                format!("{} supports {} channel(s), mask is {:#04x}", variant, variant.max_channels(), self.sensors),
            ));
        }
        Ok(SensorDescriptor {
            id: self.id,
            name: self.name.clone(),
            sensors,
            aggregation: self.sensing_method,
            variant,
            platform: self.platform,
        })
    }

    /// Zone relies on polling only
    pub fn is_passive(&self) -> bool {
        self.zone.governor == governor::POWER_ALLOCATOR
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_poll_interval() -> u64 {
    timing::DEFAULT_POLL_INTERVAL_MS
}

fn default_sensors() -> u8 {
    1
}

fn default_window_size() -> u32 {
    regs::WINDOW_SIZE
}

fn default_governor() -> String {
    governor::DEFAULT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_parked_online() -> usize {
    hotplug::DEFAULT_PARKED_ONLINE
}

/// First configuration file that exists: system path, then the user path
pub fn find_config_path() -> Option<PathBuf> {
    let system = paths::system_config_path();
    if system.exists() {
        return Some(system);
    }
    paths::user_config_path().filter(|p| p.exists())
}

/// Load, parse and validate a configuration file
pub fn load_config(path: &Path) -> Result<TmuConfig> {
    validate_file_size(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TmuError::FileNotFound(path.to_path_buf())
        } else {
            TmuError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let config = parse_config(&content)?;
    info!(path = %path.display(), devices = config.devices.len(), "Loaded TMU configuration");
    Ok(config)
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<TmuConfig> {
    let config: TmuConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    debug!(version = config.version, "Configuration validated");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "version": 1,
        "poll_interval_ms": 500,
        "devices": [{
            "id": 0,
            "name": "cpu-big",
            "compatible": "samsung,exynos8895-tmu",
            "backend": { "kind": "simulated", "trim": [50], "initial_code": 60 },
            "sensors": 7,
            "sensing_method": "MAX",
            "platform": { "first_point_trim": 25, "second_point_trim": 85 },
            "zone": { "trips": [
                { "temperature_mc": 70000, "hysteresis_mc": 5000 },
                { "temperature_mc": 80000, "hysteresis_mc": 5000 }
            ] },
            "cooling": { "kind": "cpufreq" },
            "hotplug": { "in_threshold": 60, "out_threshold": 70, "cpus": [4, 5, 6, 7] }
        }]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.poll_interval_ms, 500);
        let dev = &config.devices[0];
        assert_eq!(dev.sensing_method, AggregationPolicy::Max);
        assert_eq!(dev.zone.governor, "step_wise");
        assert!(dev.zone.trips.iter().all(|t| t.valid));
        assert_eq!(dev.cooling.kind, CoolingKind::CpuFreq);
        assert_eq!(dev.hotplug.as_ref().unwrap().parked_online, 4);

        let desc = dev.descriptor().unwrap();
        assert_eq!(desc.variant, VariantTag::Exynos8895);
        assert_eq!(desc.sensors.count(), 3);
    }

    #[test]
    fn test_unknown_sensing_method_fails_at_load() {
        let text = SAMPLE.replace("\"MAX\"", "\"median\"");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_unknown_variant_fails_at_load() {
        let text = SAMPLE.replace("exynos8895", "exynos9810");
        let err = parse_config(&text).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_single_channel_variant_rejects_remote_sensors() {
        let text = SAMPLE.replace("exynos8895", "exynos8890");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/tmu.json")).unwrap_err();
        assert!(matches!(err, TmuError::FileNotFound(_)));
    }
}
