//! Core data types shared across the engine, the daemon and the client

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{sensor, temperature};
use tmu_error::{Result, TmuError};

// ============================================================================
// Platform data
// ============================================================================

/// Board-level tuning that the fuses don't carry.
///
/// `efuse_value` packs a fallback trim pair the same way TRIMINFO does:
/// first-point code in bits 0..9, second-point code in bits 9..18.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformData {
    pub gain: u8,
    pub reference_voltage: u8,
    pub noise_cancel_mode: u8,
    pub efuse_value: u32,
    pub first_point_trim: u8,
    pub second_point_trim: u8,
    pub default_temp_offset: u8,
}

impl Default for PlatformData {
    fn default() -> Self {
        Self {
            gain: 0,
            reference_voltage: 0,
            noise_cancel_mode: 0,
            efuse_value: 0,
            first_point_trim: 25,
            second_point_trim: 85,
            default_temp_offset: 50,
        }
    }
}

// ============================================================================
// Sensor selection
// ============================================================================

/// Bitmask of active physical channels (bit n = channel n)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SensorMask(u8);

impl SensorMask {
    pub fn new(bits: u8) -> Result<Self> {
        if bits == 0 {
            return Err(TmuError::invalid_config("sensors", "at least one channel must be active"));
        }
        Ok(Self(bits))
    }

    /// Mask with only channel 0
    pub const fn single() -> Self {
        Self(1)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, channel: usize) -> bool {
        channel < sensor::MAX_CHANNELS && self.0 & (1 << channel) != 0
    }

    /// Active channels, lowest first
    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..sensor::MAX_CHANNELS).filter(move |&ch| self.contains(ch))
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest active channel
    pub fn primary(self) -> usize {
        self.0.trailing_zeros() as usize
    }
}

impl TryFrom<u8> for SensorMask {
    type Error = TmuError;

    fn try_from(bits: u8) -> Result<Self> {
        Self::new(bits)
    }
}

impl From<SensorMask> for u8 {
    fn from(mask: SensorMask) -> u8 {
        mask.0
    }
}

/// How several channel codes collapse into one reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregationPolicy {
    Average,
    Max,
    Min,
    /// Last channel visited wins
    #[default]
    Passthrough,
}

impl AggregationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::Passthrough => "passthrough",
        }
    }

    /// Fold channel codes; `None` when no channel was visited
    pub fn reduce(self, codes: impl IntoIterator<Item = u16>) -> Option<u16> {
        let mut count = 0u32;
        let mut sum = 0u32;
        let mut acc: Option<u16> = None;

        for code in codes {
            count += 1;
            sum += code as u32;
            acc = Some(match (self, acc) {
                (_, None) => code,
                (Self::Max, Some(prev)) => prev.max(code),
                (Self::Min, Some(prev)) => prev.min(code),
                (Self::Average, Some(prev)) => prev,
                (Self::Passthrough, Some(_)) => code,
            });
        }

        match self {
            Self::Average if count > 0 => Some((sum / count) as u16),
            _ => acc,
        }
    }
}

impl FromStr for AggregationPolicy {
    type Err = TmuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avg" | "average" => Ok(Self::Average),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "passthrough" | "single" => Ok(Self::Passthrough),
            other => Err(TmuError::invalid_config(
                "sensing_method",
                format!("unknown method '{}' (expected avg, max, min or passthrough)", other),
            )),
        }
    }
}

impl TryFrom<String> for AggregationPolicy {
    type Error = TmuError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AggregationPolicy> for String {
    fn from(policy: AggregationPolicy) -> String {
        policy.as_str().to_string()
    }
}

// ============================================================================
// Variants
// ============================================================================

/// SoC generation, resolved once from the compatible string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VariantTag {
    /// Single channel, contiguous interrupt pending register
    Exynos8890,
    /// Up to eight channels, banked pending registers
    Exynos8895,
}

impl VariantTag {
    pub fn from_compatible(compatible: &str) -> Result<Self> {
        match compatible.trim() {
            "samsung,exynos8890-tmu" | "exynos8890" => Ok(Self::Exynos8890),
            "samsung,exynos8895-tmu" | "exynos8895" => Ok(Self::Exynos8895),
            other => Err(TmuError::config(format!("unsupported TMU variant '{}'", other))),
        }
    }

    pub fn compatible(self) -> &'static str {
        match self {
            Self::Exynos8890 => "samsung,exynos8890-tmu",
            Self::Exynos8895 => "samsung,exynos8895-tmu",
        }
    }

    pub fn max_channels(self) -> usize {
        match self {
            Self::Exynos8890 => 1,
            Self::Exynos8895 => sensor::MAX_CHANNELS,
        }
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.compatible())
    }
}

impl TryFrom<String> for VariantTag {
    type Error = TmuError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_compatible(&s)
    }
}

impl From<VariantTag> for String {
    fn from(tag: VariantTag) -> String {
        tag.compatible().to_string()
    }
}

/// Everything needed to bring up one TMU instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub id: u32,
    pub name: String,
    pub sensors: SensorMask,
    pub aggregation: AggregationPolicy,
    pub variant: VariantTag,
    pub platform: PlatformData,
}

// ============================================================================
// Trips
// ============================================================================

/// One trip level as supplied by the zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripPoint {
    pub temperature_mc: i32,
    pub hysteresis_mc: i32,
}

impl TripPoint {
    pub fn new(temperature_mc: i32, hysteresis_mc: i32) -> Self {
        Self {
            temperature_mc,
            hysteresis_mc,
        }
    }

    /// Rising threshold in whole degrees
    pub fn rising_celsius(&self) -> i32 {
        self.temperature_mc / temperature::MCELSIUS
    }

    /// Falling threshold in whole degrees
    pub fn falling_celsius(&self) -> i32 {
        self.rising_celsius() - self.hysteresis_mc / temperature::MCELSIUS
    }
}

/// Ordered trip snapshot, index 0 is the coolest level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripTable {
    trips: Vec<TripPoint>,
}

impl TripTable {
    pub fn new(trips: Vec<TripPoint>) -> Result<Self> {
        if trips.len() > sensor::MAX_TRIPS {
            return Err(TmuError::config(format!(
                "{} trips configured, hardware holds at most {}",
                trips.len(),
                sensor::MAX_TRIPS
            )));
        }
        Ok(Self { trips })
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TripPoint> {
        self.trips.get(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, &TripPoint)> {
        self.trips.iter().enumerate()
    }
}

// ============================================================================
// Hotplug
// ============================================================================

/// Two-threshold CPU parking band (°C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugPolicy {
    pub in_threshold: i32,
    pub out_threshold: i32,
    /// CPUs requested online while parked
    pub parked_online: usize,
}

impl HotplugPolicy {
    pub fn new(in_threshold: i32, out_threshold: i32, parked_online: usize) -> Result<Self> {
        if in_threshold >= out_threshold {
            return Err(TmuError::invalid_config(
                "hotplug",
                format!(
                    "in_threshold ({}) must be below out_threshold ({})",
                    in_threshold, out_threshold
                ),
            ));
        }
        Ok(Self {
            in_threshold,
            out_threshold,
            parked_online,
        })
    }
}

// ============================================================================
// Cooling
// ============================================================================

/// Actuator family bound to a zone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoolingKind {
    CpuFreq,
    GpuFreq,
    Isp,
    #[default]
    None,
}

impl fmt::Display for CoolingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CpuFreq => "cpufreq",
            Self::GpuFreq => "gpufreq",
            Self::Isp => "isp",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Device state
// ============================================================================

/// Where a device sits in its bring-up/teardown sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Initialized,
    Enabled,
    Suspended,
    Removed,
}

/// Software state guarded by the device lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub stage: Lifecycle,
    pub enabled: bool,
    pub suspended: bool,
    /// Active emulation override (m°C)
    pub emulation_mc: Option<i32>,
    /// Whether the hotplug band has parked CPUs. `None` without a band. The
    /// latch is system-wide, so the device reads it when reporting state.
    #[serde(default)]
    pub hotplug_parked: Option<bool>,
}

/// Trip-level change notification emitted after an interrupt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub zone: String,
    /// First trip index still above the zone temperature, or the trip count
    pub trip_level: usize,
    pub temperature_mc: i32,
}

/// Read-only view of a device for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: u32,
    pub name: String,
    pub variant: String,
    pub sensors: u8,
    pub aggregation: String,
    pub state: DeviceState,
    pub passive: bool,
    pub cooling: CoolingKind,
    pub last_temperature_mc: Option<i32>,
}
