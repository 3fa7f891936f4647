//! Multi-channel TMU (Exynos8895 generation)
//!
//! Up to eight channels share one register window. Channel 0 is the main
//! sensor; remote channels have their own TRIMINFO word, their own INTEN and
//! INTPEND registers, and share one remote threshold block.

use tracing::debug;

use super::regs::{current_temp_slot, intpend_offset, inten_offset, trim_offset, RegisterIo};
use super::threshold::program_thresholds;
use super::variant::{compose_control, run_control, TmuHw, TmuVariant};
use crate::calibration::{CalibrationParameters, CalibrationSet};
use crate::constants::{bits, regs, sensor};
use crate::data::{TripTable, VariantTag};
use tmu_error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct Exynos8895;

impl Exynos8895 {
    fn channel_code(io: &dyn RegisterIo, channel: usize) -> u16 {
        let (offset, shift) = current_temp_slot(channel);
        ((io.read32(offset) >> shift) & sensor::CODE_MASK) as u16
    }

    fn threshold_block(channel: usize) -> u32 {
        if channel == 0 {
            0
        } else {
            regs::THD_REMOTE_OFFSET
        }
    }
}

impl TmuVariant for Exynos8895 {
    fn tag(&self) -> VariantTag {
        VariantTag::Exynos8895
    }

    fn initialize(&self, hw: &TmuHw, trips: &TripTable, passive: bool) -> Result<CalibrationSet> {
        let io = hw.io.as_ref();

        let mut set: Option<CalibrationSet> = None;
        for channel in hw.sensors.channels() {
            let trim = io.read32(trim_offset(channel));
            let params = CalibrationParameters::from_trim(trim, &hw.platform)?;
            debug!(channel, kind = ?params.kind, trim_low = params.trim_low, "Resolved channel trim");

            set.get_or_insert_with(|| CalibrationSet::new(params))
                .set_channel(channel, params);
        }
        // Only reachable with an empty mask
        let set = set.unwrap_or_else(|| {
            CalibrationSet::new(CalibrationParameters::uncalibrated(
                hw.platform.default_temp_offset as i32,
            ))
        });

        if !passive {
            for channel in hw.sensors.channels() {
                program_thresholds(io, &set.primary, trips, Self::threshold_block(channel));
            }
        }
        self.clear_interrupts(hw);

        Ok(set)
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

        // Stop the core before reprogramming
        io.modify32(regs::CONTROL, bits::CORE_EN | bits::THERM_TRIP_EN, 0);

        let avg_sel = (io.read32(regs::TRIMINFO2) >> bits::AVG_SEL_SHIFT) & bits::AVG_SEL_MASK;
        let avg_con = io.read32(regs::AVG_CON);
        let avg_mode = if avg_sel == 0 {
            bits::AVG_MODE_4
        } else {
            avg_con & bits::AVG_MODE_MASK
        };
        let avg_con = (avg_con & !bits::AVG_MODE_MASK) | avg_mode;

        let con = compose_control(
            io.read32(regs::CONTROL),
            &calibration.primary.bias,
            hw.platform.noise_cancel_mode,
        );
        let con = run_control(io, con, on);

        if !passive {
            let inten = if on { interrupt_mask } else { 0 };
            for channel in hw.sensors.channels() {
                io.write32(inten_offset(channel), inten);
            }
        }
        io.write32(regs::CONTROL, con);
        io.write32(regs::AVG_CON, avg_con);
    }

    fn read_raw(&self, hw: &TmuHw) -> u16 {
        let io = hw.io.as_ref();
        hw.aggregation
            .reduce(hw.sensors.channels().map(|ch| Self::channel_code(io, ch)))
            .unwrap_or(0)
    }

    fn read_channel(&self, hw: &TmuHw, channel: usize) -> Option<u16> {
        hw.sensors
            .contains(channel)
            .then(|| Self::channel_code(hw.io.as_ref(), channel))
    }

    fn clear_interrupts(&self, hw: &TmuHw) {
        for channel in hw.sensors.channels() {
            let reg = intpend_offset(channel);
            let pending = hw.io.read32(reg);
            hw.io.write32(reg, pending);
        }
    }
}
