//! Sensor calibration
//!
//! Maps Celsius to raw 9-bit sensor codes and back using the factory trim
//! fused into TRIMINFO, falling back to the platform efuse value when the
//! fuse reads zero.
//!
//! Two-point conversion rounds toward the lower code when encoding and toward
//! the higher temperature when decoding, so that
//! `celsius_from_code(code_from_celsius(t))` returns `t` for every `t` in the
//! supported domain. That only holds while no two degrees share a code, so a
//! two-point trim whose code span is narrower than its temperature span is
//! rejected.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{bits, sensor, temperature};
use crate::data::PlatformData;
use tmu_error::{Result, TmuError};

/// Trimming scheme burned into the part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationType {
    OnePoint,
    TwoPoint,
    /// No trim in fuse or efuse; a fixed offset is applied
    Uncalibrated,
}

impl CalibrationType {
    fn from_calib_sel(sel: u32) -> Self {
        if sel == 0 {
            Self::OnePoint
        } else {
            Self::TwoPoint
        }
    }
}

/// Analog front-end bias programmed into CONTROL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferBias {
    pub reference_voltage: u8,
    pub gain: u8,
}

/// Calibration of one physical channel. Immutable once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    pub kind: CalibrationType,
    /// Code read at `low_point`
    pub trim_low: i32,
    /// Code read at `high_point` (two-point only)
    pub trim_high: i32,
    /// Lower calibration temperature (°C)
    pub low_point: i32,
    /// Upper calibration temperature (°C)
    pub high_point: i32,
    /// Offset used by uncalibrated parts
    pub default_offset: i32,
    pub bias: BufferBias,
}

impl CalibrationParameters {
    pub fn one_point(trim_low: i32, low_point: i32) -> Self {
        Self {
            kind: CalibrationType::OnePoint,
            trim_low,
            trim_high: 0,
            low_point,
            high_point: 0,
            default_offset: 0,
            bias: BufferBias::default(),
        }
    }

    pub fn two_point(trim_low: i32, trim_high: i32, low_point: i32, high_point: i32) -> Result<Self> {
        let params = Self {
            kind: CalibrationType::TwoPoint,
            trim_low,
            trim_high,
            low_point,
            high_point,
            default_offset: 0,
            bias: BufferBias::default(),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn uncalibrated(default_offset: i32) -> Self {
        Self {
            kind: CalibrationType::Uncalibrated,
            trim_low: 0,
            trim_high: 0,
            low_point: 0,
            high_point: 0,
            default_offset,
            bias: BufferBias::default(),
        }
    }

    pub fn with_bias(mut self, bias: BufferBias) -> Self {
        self.bias = bias;
        self
    }

    /// Decode a TRIMINFO word, substituting the efuse fields for zero trims.
    pub fn from_trim(trim: u32, platform: &PlatformData) -> Result<Self> {
        let kind = CalibrationType::from_calib_sel((trim >> bits::CALIB_SEL_SHIFT) & bits::CALIB_SEL_MASK);
        let bias = BufferBias {
            reference_voltage: platform.reference_voltage,
            gain: platform.gain,
        };

        let trim_low = match trim & sensor::CODE_MASK {
            0 => platform.efuse_value & sensor::CODE_MASK,
            code => code,
        };

        if trim_low == 0 {
            debug!(
                offset = platform.default_temp_offset,
                "No trim in fuse or efuse, using default offset"
            );
            return Ok(Self::uncalibrated(platform.default_temp_offset as i32).with_bias(bias));
        }

        let low_point = platform.first_point_trim as i32;
        let params = match kind {
            CalibrationType::TwoPoint => {
                let trim_high = match (trim >> bits::TRIM_SECOND_POINT_SHIFT) & sensor::CODE_MASK {
                    0 => (platform.efuse_value >> bits::TRIM_SECOND_POINT_SHIFT) & sensor::CODE_MASK,
                    code => code,
                };
                Self::two_point(
                    trim_low as i32,
                    trim_high as i32,
                    low_point,
                    platform.second_point_trim as i32,
                )?
            }
            _ => Self::one_point(trim_low as i32, low_point),
        };

        Ok(params.with_bias(bias))
    }

    /// Reject spans that would divide by zero, invert the slope or map two
    /// degrees onto one code
    pub fn validate(&self) -> Result<()> {
        if self.kind != CalibrationType::TwoPoint {
            return Ok(());
        }
        if self.high_point <= self.low_point {
            return Err(TmuError::config(format!(
                "degenerate calibration span: high point {} must exceed low point {}",
                self.high_point, self.low_point
            )));
        }
        if self.trim_high <= self.trim_low {
            return Err(TmuError::config(format!(
                "degenerate calibration span: trim {} at {}°C must exceed trim {} at {}°C",
                self.trim_high, self.high_point, self.trim_low, self.low_point
            )));
        }
        let code_span = self.trim_high - self.trim_low;
        let temp_span = self.high_point - self.low_point;
        if code_span < temp_span {
            return Err(TmuError::config(format!(
                "calibration resolution below 1 code/°C: trims {}..{} cover {}°C..{}°C",
                self.trim_low, self.trim_high, self.low_point, self.high_point
            )));
        }
        Ok(())
    }

    /// Raw sensor code for a temperature in °C
    pub fn code_from_celsius(&self, celsius: i32) -> u16 {
        let t = clamp_celsius(celsius);
        let code = match self.kind {
            CalibrationType::TwoPoint => {
                let code_span = self.trim_high - self.trim_low;
                let temp_span = self.high_point - self.low_point;
                ((t - self.low_point) * code_span).div_euclid(temp_span) + self.trim_low
            }
            CalibrationType::OnePoint => t + self.trim_low - self.low_point,
            CalibrationType::Uncalibrated => t + self.default_offset,
        };
        code.clamp(0, sensor::CODE_MASK as i32) as u16
    }

    /// Temperature in °C for a raw sensor code
    pub fn celsius_from_code(&self, code: u16) -> i32 {
        let code = (code as u32 & sensor::CODE_MASK) as i32;
        let t = match self.kind {
            CalibrationType::TwoPoint => {
                let code_span = self.trim_high - self.trim_low;
                let temp_span = self.high_point - self.low_point;
                div_ceil((code - self.trim_low) * temp_span, code_span) + self.low_point
            }
            CalibrationType::OnePoint => code - self.trim_low + self.low_point,
            CalibrationType::Uncalibrated => code - self.default_offset,
        };
        clamp_celsius(t)
    }

    /// Raw code for a milli-Celsius value, truncated to whole degrees first
    pub fn code_from_millicelsius(&self, millicelsius: i32) -> u16 {
        self.code_from_celsius(millicelsius / temperature::MCELSIUS)
    }
}

/// Calibration of every active channel of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationSet {
    /// Lowest active channel; thresholds and aggregated reads use it
    pub primary: CalibrationParameters,
    channels: [Option<CalibrationParameters>; sensor::MAX_CHANNELS],
}

impl CalibrationSet {
    pub fn new(primary: CalibrationParameters) -> Self {
        Self {
            primary,
            channels: [None; sensor::MAX_CHANNELS],
        }
    }

    pub fn set_channel(&mut self, channel: usize, params: CalibrationParameters) {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = Some(params);
        }
    }

    /// Calibration of one channel, or the primary one if it has no own trim
    pub fn for_channel(&self, channel: usize) -> &CalibrationParameters {
        self.channels
            .get(channel)
            .and_then(|c| c.as_ref())
            .unwrap_or(&self.primary)
    }
}

fn clamp_celsius(celsius: i32) -> i32 {
    celsius.clamp(temperature::MIN_CELSIUS, temperature::MAX_CELSIUS)
}

fn div_ceil(numerator: i32, denominator: i32) -> i32 {
    -((-numerator).div_euclid(denominator))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> PlatformData {
        PlatformData {
            efuse_value: 0,
            first_point_trim: 25,
            second_point_trim: 85,
            default_temp_offset: 50,
            ..PlatformData::default()
        }
    }

    #[test]
    fn test_two_point_round_trip_over_domain() {
        for (low, high) in [(40, 100), (50, 113), (60, 120), (46, 186)] {
            let params = CalibrationParameters::two_point(low, high, 25, 85).unwrap();
            for t in temperature::MIN_CELSIUS..=temperature::MAX_CELSIUS {
                let code = params.code_from_celsius(t);
                assert_eq!(params.celsius_from_code(code), t, "trim {low}/{high} at {t}°C");
            }
        }
    }

    #[test]
    fn test_one_point_round_trip_over_domain() {
        let params = CalibrationParameters::one_point(52, 25);
        for t in temperature::MIN_CELSIUS..=temperature::MAX_CELSIUS {
            assert_eq!(params.celsius_from_code(params.code_from_celsius(t)), t);
        }
        assert_eq!(params.code_from_celsius(25), 52);
    }

    #[test]
    fn test_inputs_outside_domain_are_clamped() {
        let params = CalibrationParameters::one_point(50, 25);
        assert_eq!(params.code_from_celsius(-40), params.code_from_celsius(10));
        assert_eq!(params.code_from_celsius(400), params.code_from_celsius(125));
        assert_eq!(params.celsius_from_code(0), temperature::MIN_CELSIUS);
        assert_eq!(params.celsius_from_code(0x1FF), temperature::MAX_CELSIUS);
    }

    #[test]
    fn test_two_point_formula() {
        let params = CalibrationParameters::two_point(50, 110, 25, 85).unwrap();
        assert_eq!(params.code_from_celsius(25), 50);
        assert_eq!(params.code_from_celsius(85), 110);
        assert_eq!(params.code_from_celsius(80), 105);
        assert_eq!(params.celsius_from_code(105), 80);
    }

    #[test]
    fn test_degenerate_span_rejected() {
        let err = CalibrationParameters::two_point(50, 110, 25, 25).unwrap_err();
        assert!(err.is_config());
        let err = CalibrationParameters::two_point(80, 80, 25, 85).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_narrow_code_span_rejected() {
        // 55 codes over 60 degrees
        let err = CalibrationParameters::two_point(50, 105, 25, 85).unwrap_err();
        assert!(err.is_config());
        let err = CalibrationParameters::two_point(50, 109, 25, 85).unwrap_err();
        assert!(err.is_config());

        let trim = (1 << 23) | (105 << 9) | 50;
        assert!(CalibrationParameters::from_trim(trim, &platform()).unwrap_err().is_config());
    }

    #[test]
    fn test_narrowest_accepted_span_round_trips() {
        for (low, high, low_point, high_point) in [(50, 110, 25, 85), (30, 31, 40, 41), (12, 127, 10, 125)] {
            let params = CalibrationParameters::two_point(low, high, low_point, high_point).unwrap();
            for t in temperature::MIN_CELSIUS..=temperature::MAX_CELSIUS {
                let code = params.code_from_celsius(t);
                assert_eq!(params.celsius_from_code(code), t, "trim {low}/{high} at {t}°C");
            }
        }
    }

    #[test]
    fn test_from_trim_one_point() {
        let params = CalibrationParameters::from_trim(0x34, &platform()).unwrap();
        assert_eq!(params.kind, CalibrationType::OnePoint);
        assert_eq!(params.trim_low, 0x34);
    }

    #[test]
    fn test_from_trim_two_point() {
        let trim = (1 << 23) | (110 << 9) | 50;
        let params = CalibrationParameters::from_trim(trim, &platform()).unwrap();
        assert_eq!(params.kind, CalibrationType::TwoPoint);
        assert_eq!((params.trim_low, params.trim_high), (50, 110));
        assert_eq!((params.low_point, params.high_point), (25, 85));
    }

    #[test]
    fn test_from_trim_falls_back_to_efuse() {
        let mut pdata = platform();
        pdata.efuse_value = (112 << 9) | 48;
        let params = CalibrationParameters::from_trim(1 << 23, &pdata).unwrap();
        assert_eq!((params.trim_low, params.trim_high), (48, 112));
    }

    #[test]
    fn test_from_trim_without_any_trim_uses_offset() {
        let params = CalibrationParameters::from_trim(0, &platform()).unwrap();
        assert_eq!(params.kind, CalibrationType::Uncalibrated);
        assert_eq!(params.code_from_celsius(40), 90);
        assert_eq!(params.celsius_from_code(90), 40);
    }

    #[test]
    fn test_from_trim_degenerate_platform_points() {
        let mut pdata = platform();
        pdata.second_point_trim = pdata.first_point_trim;
        let trim = (1 << 23) | (110 << 9) | 50;
        assert!(CalibrationParameters::from_trim(trim, &pdata).unwrap_err().is_config());
    }

    #[test]
    fn test_set_falls_back_to_primary() {
        let primary = CalibrationParameters::one_point(50, 25);
        let mut set = CalibrationSet::new(primary);
        set.set_channel(3, CalibrationParameters::one_point(60, 25));
        assert_eq!(set.for_channel(3).trim_low, 60);
        assert_eq!(set.for_channel(2).trim_low, 50);
        assert_eq!(set.for_channel(42).trim_low, 50);
    }
}
