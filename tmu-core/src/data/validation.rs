//! Configuration validation
//!
//! Everything the engine assumes about its configuration is checked here,
//! once, at load time. Devices are only ever built from a validated config.

use std::collections::HashSet;
use std::path::Path;

use super::config::{DeviceConfig, TmuConfig};
use crate::calibration::CalibrationParameters;
use crate::constants::{limits, sensor, temperature, timing, CONFIG_VERSION};
use tmu_error::{Result, TmuError};

/// Rejects files larger than the configuration size limit
pub fn validate_file_size(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TmuError::FileNotFound(path.to_path_buf())
        } else {
            TmuError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    if metadata.len() > limits::MAX_CONFIG_FILE_SIZE {
        return Err(TmuError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max_size: limits::MAX_CONFIG_FILE_SIZE,
        });
    }

    Ok(())
}

/// Validates a zone/device name used for lookups over IPC
pub fn validate_zone_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(TmuError::invalid_config("name", "cannot be empty"));
    }

    if trimmed.len() > limits::MAX_ZONE_NAME_LEN {
        return Err(TmuError::invalid_config(
            "name",
            format!("exceeds maximum length of {} characters", limits::MAX_ZONE_NAME_LEN),
        ));
    }

    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(TmuError::invalid_config(
            "name",
            format!("'{}' contains characters outside [A-Za-z0-9._-]", trimmed),
        ));
    }

    Ok(trimmed)
}

/// Validates the whole configuration
pub fn validate_config(config: &TmuConfig) -> Result<()> {
    if config.version != CONFIG_VERSION {
        return Err(TmuError::invalid_config(
            "version",
            format!("unsupported version {} (expected {})", config.version, CONFIG_VERSION),
        ));
    }

    if config.poll_interval_ms < timing::MIN_POLL_INTERVAL_MS {
        return Err(TmuError::invalid_config(
            "poll_interval_ms",
            format!("must be at least {} ms", timing::MIN_POLL_INTERVAL_MS),
        ));
    }

    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for device in &config.devices {
        if !ids.insert(device.id) {
            return Err(TmuError::invalid_config("devices", format!("duplicate id {}", device.id)));
        }
        if !names.insert(device.name.as_str()) {
            return Err(TmuError::invalid_config(
                "devices",
                format!("duplicate name '{}'", device.name),
            ));
        }
        validate_device(device)?;
    }

    Ok(())
}

fn validate_device(device: &DeviceConfig) -> Result<()> {
    validate_zone_name(&device.name)?;

    // Variant and channel mask
    device.descriptor()?;

    let pdata = &device.platform;
    if pdata.first_point_trim >= pdata.second_point_trim {
        return Err(TmuError::config(format!(
            "{}: degenerate calibration span ({}°C .. {}°C)",
            device.name, pdata.first_point_trim, pdata.second_point_trim
        )));
    }

    let efuse_low = (pdata.efuse_value & sensor::CODE_MASK) as i32;
    let efuse_high = ((pdata.efuse_value >> sensor::CODE_SHIFT) & sensor::CODE_MASK) as i32;
    if efuse_low != 0 && efuse_high != 0 {
        CalibrationParameters::two_point(
            efuse_low,
            efuse_high,
            pdata.first_point_trim as i32,
            pdata.second_point_trim as i32,
        )
        .map_err(|e| TmuError::config(format!("{}: efuse_value: {}", device.name, e)))?;
    }

    let field = |name: &str| format!("devices[{}].{}", device.name, name);

    if device.zone.trips.len() > sensor::MAX_TRIPS {
        return Err(TmuError::config(format!(
            "{}: {} trips configured, hardware holds at most {}",
            device.name,
            device.zone.trips.len(),
            sensor::MAX_TRIPS
        )));
    }

    let max_mc = temperature::MAX_CELSIUS * temperature::MCELSIUS;
    let mut previous = i32::MIN;
    for (i, trip) in device.zone.trips.iter().enumerate() {
        if !(0..=max_mc).contains(&trip.temperature_mc) {
            return Err(TmuError::invalid_config(
                field(&format!("zone.trips[{}]", i)),
                format!("temperature {} m°C outside 0..={}", trip.temperature_mc, max_mc),
            ));
        }
        if trip.hysteresis_mc < 0 || trip.hysteresis_mc > trip.temperature_mc {
            return Err(TmuError::invalid_config(
                field(&format!("zone.trips[{}]", i)),
                format!("hysteresis {} m°C out of range", trip.hysteresis_mc),
            ));
        }
        if trip.temperature_mc < previous {
            return Err(TmuError::invalid_config(
                field("zone.trips"),
                "trips must be listed coolest first",
            ));
        }
        previous = trip.temperature_mc;
    }

    if let Some(hotplug) = &device.hotplug {
        hotplug.policy()?;
        if hotplug.parked_online == 0 {
            return Err(TmuError::invalid_config(field("hotplug.parked_online"), "must keep at least one CPU"));
        }
        if hotplug.cpus.contains(&0) {
            return Err(TmuError::invalid_config(field("hotplug.cpus"), "the boot CPU cannot be parked"));
        }
    }

    Ok(())
}
