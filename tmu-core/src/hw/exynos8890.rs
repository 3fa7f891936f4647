//! Single-channel TMU (Exynos8890 generation)

use tracing::debug;

use super::regs::RegisterIo;
use super::threshold::program_thresholds;
use super::variant::{compose_control, run_control, TmuHw, TmuVariant};
use crate::calibration::{CalibrationParameters, CalibrationSet};
use crate::constants::{regs, sensor};
use crate::data::{TripTable, VariantTag};
use tmu_error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct Exynos8890;

impl TmuVariant for Exynos8890 {
    fn tag(&self) -> VariantTag {
        VariantTag::Exynos8890
    }

    fn initialize(&self, hw: &TmuHw, trips: &TripTable, passive: bool) -> Result<CalibrationSet> {
        let trim = hw.io.read32(regs::TRIMINFO);
        let primary = CalibrationParameters::from_trim(trim, &hw.platform)?;
        debug!(kind = ?primary.kind, trim_low = primary.trim_low, trim_high = primary.trim_high, "Resolved trim");

        if !passive {
            program_thresholds(hw.io.as_ref(), &primary, trips, 0);
        }
        self.clear_interrupts(hw);

        Ok(CalibrationSet::new(primary))
    }

    fn set_enabled(
        &self,
        hw: &TmuHw,
        calibration: &CalibrationSet,
        on: bool,
        interrupt_mask: u32,
        passive: bool,
    ) {
        let io = hw.io.as_ref();
        let con = compose_control(
            io.read32(regs::CONTROL),
            &calibration.primary.bias,
            hw.platform.noise_cancel_mode,
        );
        let con = run_control(io, con, on);

        if !passive {
            io.write32(regs::INTEN, if on { interrupt_mask } else { 0 });
        }
        io.write32(regs::CONTROL, con);
    }

    fn read_raw(&self, hw: &TmuHw) -> u16 {
        (hw.io.read16(regs::CURRENT_TEMP1_0) as u32 & sensor::CODE_MASK) as u16
    }

    fn read_channel(&self, hw: &TmuHw, channel: usize) -> Option<u16> {
        (channel == 0).then(|| self.read_raw(hw))
    }

    fn clear_interrupts(&self, hw: &TmuHw) {
        let pending = hw.io.read32(regs::INTPEND0);
        hw.io.write32(regs::INTPEND0, pending);
    }
}
