//! Per-SoC register behaviour
//!
//! Each generation implements [`TmuVariant`]. The controller picks one with
//! [`variant_for`] at setup and never looks at the tag again, so adding a
//! generation means adding an implementation here, not touching the engine.

use std::fmt;
use std::sync::Arc;

use super::exynos8890::Exynos8890;
use super::exynos8895::Exynos8895;
use super::regs::RegisterIo;
use crate::calibration::{BufferBias, CalibrationParameters, CalibrationSet};
use crate::constants::{bits, regs};
use crate::data::{AggregationPolicy, PlatformData, SensorMask, TripTable, VariantTag};
use tmu_error::Result;

/// Register window plus the static description of one TMU instance
#[derive(Clone)]
pub struct TmuHw {
    pub io: Arc<dyn RegisterIo>,
    pub sensors: SensorMask,
    pub aggregation: AggregationPolicy,
    pub platform: PlatformData,
}

impl fmt::Debug for TmuHw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmuHw")
            .field("sensors", &self.sensors)
            .field("aggregation", &self.aggregation)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

/// Capability set every SoC generation provides
pub trait TmuVariant: Send + Sync + fmt::Debug {
    fn tag(&self) -> VariantTag;

    /// Resolve trims, program thresholds (unless `passive`) and clear
    /// pending interrupts.
    fn initialize(&self, hw: &TmuHw, trips: &TripTable, passive: bool) -> Result<CalibrationSet>;

    /// Start or stop sampling. `interrupt_mask` is the INTEN value to use
    /// when enabling.
    fn set_enabled(
        &self,
        hw: &TmuHw,
        calibration: &CalibrationSet,
        on: bool,
        interrupt_mask: u32,
        passive: bool,
    );

    /// Current code, aggregated across active channels
    fn read_raw(&self, hw: &TmuHw) -> u16;

    /// Code of one physical channel, `None` if it isn't active
    fn read_channel(&self, hw: &TmuHw, channel: usize) -> Option<u16>;

    fn clear_interrupts(&self, hw: &TmuHw);

    /// Force the readout to `millicelsius`, or release it with 0
    fn set_emulation(
        &self,
        hw: &TmuHw,
        calibration: &CalibrationParameters,
        millicelsius: i32,
    ) -> Result<()> {
        let current = hw.io.read32(regs::EMUL_CON);
        let code = calibration.code_from_millicelsius(millicelsius);
        hw.io.write32(regs::EMUL_CON, emulation_value(current, millicelsius, code));
        Ok(())
    }
}

/// Implementation for a variant tag
pub fn variant_for(tag: VariantTag) -> Box<dyn TmuVariant> {
    match tag {
        VariantTag::Exynos8890 => Box::new(Exynos8890),
        VariantTag::Exynos8895 => Box::new(Exynos8895),
    }
}

/// Apply platform bias and noise-cancel mode to a CONTROL value
pub(crate) fn compose_control(con: u32, bias: &BufferBias, noise_cancel_mode: u8) -> u32 {
    let mut con = con;

    con &= !(bits::REF_VOLTAGE_MASK << bits::REF_VOLTAGE_SHIFT);
    con |= (bias.reference_voltage as u32 & bits::REF_VOLTAGE_MASK) << bits::REF_VOLTAGE_SHIFT;

    con &= !(bits::BUF_SLOPE_SEL_MASK << bits::BUF_SLOPE_SEL_SHIFT);
    con |= (bias.gain as u32 & bits::BUF_SLOPE_SEL_MASK) << bits::BUF_SLOPE_SEL_SHIFT;

    if noise_cancel_mode != 0 {
        con &= !(bits::TRIP_MODE_MASK << bits::TRIP_MODE_SHIFT);
        con |= (noise_cancel_mode as u32 & bits::TRIP_MODE_MASK) << bits::TRIP_MODE_SHIFT;
    }

    con
}

/// CONTROL value for the requested run state.
///
/// Enabling ORs in the fused buffer reference and slope selections from
/// TRIMINFO/TRIMINFO1 and sets the core and thermal-trip enables.
pub(crate) fn run_control(io: &dyn RegisterIo, con: u32, on: bool) -> u32 {
    if !on {
        return con & !(bits::CORE_EN | bits::THERM_TRIP_EN);
    }

    let trim = io.read32(regs::TRIMINFO);
    let trim1 = io.read32(regs::TRIMINFO1);
    let vref = (trim >> bits::T_BUF_VREF_SEL_SHIFT) & bits::T_BUF_VREF_SEL_MASK;
    let slope = (trim1 >> bits::T_BUF_SLOPE_SEL_SHIFT) & bits::T_BUF_SLOPE_SEL_MASK;

    con | vref << bits::REF_VOLTAGE_SHIFT
        | slope << bits::BUF_SLOPE_SEL_SHIFT
        | bits::CORE_EN
        | bits::THERM_TRIP_EN
}

/// EMUL_CON value: new code plus enable, or enable cleared for 0
pub(crate) fn emulation_value(current: u32, millicelsius: i32, code: u16) -> u32 {
    if millicelsius == 0 {
        return current & !bits::EMUL_ENABLE;
    }
    let cleared = current & !(bits::EMUL_DATA_MASK << bits::EMUL_DATA_SHIFT);
    cleared | (code as u32 & bits::EMUL_DATA_MASK) << bits::EMUL_DATA_SHIFT | bits::EMUL_ENABLE
}
