//! Trip threshold programming
//!
//! Four rising registers (THD_TEMP_RISE7_6 .. RISE1_0) and four falling
//! registers hold two 9-bit codes each, the higher trip level in bits 16..24
//! and the lower one in bits 0..8:
//!
//! ```text
//! 0x50  [24:16] level 7   [8:0] level 6
//! 0x54  [24:16] level 5   [8:0] level 4
//! 0x58  [24:16] level 3   [8:0] level 2
//! 0x5C  [24:16] level 1   [8:0] level 0
//! ```
//!
//! Both registers are updated read-modify-write so the neighbouring slot of
//! a pair is never disturbed.

use tracing::trace;

use super::regs::RegisterIo;
use crate::calibration::CalibrationParameters;
use crate::constants::{bits, regs, sensor};
use crate::data::TripTable;

/// Register offset (from RISE7_6 / FALL7_6) and bit shift of a trip level
pub fn threshold_slot(index: usize) -> (u32, u32) {
    let index = index as u32;
    let reg_off = ((7 - index) / 2) * 4;
    let bit_off = (8 - index) % 2;
    (reg_off, bits::THRESHOLD_SLOT_SHIFT * bit_off)
}

/// Write every trip of `trips`, hottest first, into the threshold block at
/// `block_offset` (0 for the main channel).
pub fn program_thresholds(
    io: &dyn RegisterIo,
    calibration: &CalibrationParameters,
    trips: &TripTable,
    block_offset: u32,
) {
    for (index, trip) in trips.iter().rev() {
        let (reg_off, shift) = threshold_slot(index);
        let mask = sensor::CODE_MASK << shift;

        let rising = calibration.code_from_celsius(trip.rising_celsius()) as u32;
        let falling = calibration.code_from_celsius(trip.falling_celsius()) as u32;

        let rise_reg = regs::THD_TEMP_RISE7_6 + block_offset + reg_off;
        let fall_reg = regs::THD_TEMP_FALL7_6 + block_offset + reg_off;
        io.modify32(rise_reg, mask, (rising & sensor::CODE_MASK) << shift);
        io.modify32(fall_reg, mask, (falling & sensor::CODE_MASK) << shift);

        trace!(
            index,
            rising,
            falling,
            reg = %format!("{:#x}", rise_reg),
            shift,
            "Programmed trip threshold"
        );
    }
}

/// Rising and falling codes currently programmed for a trip level
pub fn read_threshold(io: &dyn RegisterIo, block_offset: u32, index: usize) -> (u16, u16) {
    let (reg_off, shift) = threshold_slot(index);
    let rise = io.read32(regs::THD_TEMP_RISE7_6 + block_offset + reg_off);
    let fall = io.read32(regs::THD_TEMP_FALL7_6 + block_offset + reg_off);
    (
        ((rise >> shift) & sensor::CODE_MASK) as u16,
        ((fall >> shift) & sensor::CODE_MASK) as u16,
    )
}

/// INTEN value enabling rising and falling interrupts for every valid trip
pub fn interrupt_enable_mask(is_valid: impl Fn(usize) -> bool) -> u32 {
    let rising = (0..sensor::MAX_TRIPS)
        .filter(|&i| is_valid(i))
        .fold(0u32, |acc, i| acc | 1 << (bits::INTEN_RISE0_SHIFT + i as u32));
    rising | rising << bits::INTEN_FALL0_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TripPoint;
    use crate::hw::regs::SimulatedTmu;

    fn calibration() -> CalibrationParameters {
        CalibrationParameters::one_point(50, 25)
    }

    #[test]
    fn test_slot_layout() {
        assert_eq!(threshold_slot(7), (0x0, 16));
        assert_eq!(threshold_slot(6), (0x0, 0));
        assert_eq!(threshold_slot(3), (0x8, 16));
        assert_eq!(threshold_slot(1), (0xC, 16));
        assert_eq!(threshold_slot(0), (0xC, 0));
    }

    #[test]
    fn test_two_trip_packing() {
        let sim = SimulatedTmu::new();
        let trips = TripTable::new(vec![
            TripPoint::new(80_000, 5_000),
            TripPoint::new(70_000, 5_000),
        ])
        .unwrap();
        let cal = calibration();
        program_thresholds(&sim, &cal, &trips, 0);

        // level 0 in the low half, level 1 in the high half of RISE1_0 / FALL1_0
        let rise = sim.peek(0x5C);
        let fall = sim.peek(0x6C);
        assert_eq!(rise & 0x1FF, cal.code_from_celsius(80) as u32);
        assert_eq!((rise >> 16) & 0x1FF, cal.code_from_celsius(70) as u32);
        assert_eq!(fall & 0x1FF, cal.code_from_celsius(75) as u32);
        assert_eq!((fall >> 16) & 0x1FF, cal.code_from_celsius(65) as u32);

        assert_eq!(read_threshold(&sim, 0, 0), (105, 100));
        assert_eq!(read_threshold(&sim, 0, 1), (95, 90));

        for reg in [0x50, 0x54, 0x58, 0x60, 0x64, 0x68] {
            assert_eq!(sim.peek(reg), 0, "register {:#x} untouched", reg);
        }
    }

    #[test]
    fn test_neighbouring_slot_survives() {
        let sim = SimulatedTmu::new();
        sim.write32(0x5C, 0xABCD_0000 & !(0x1FF << 16) | (0x77 << 16));
        sim.write32(0x6C, 0x66 << 16);
        let trips = TripTable::new(vec![TripPoint::new(80_000, 5_000)]).unwrap();
        program_thresholds(&sim, &calibration(), &trips, 0);
        assert_eq!((sim.peek(0x5C) >> 16) & 0x1FF, 0x77);
        assert_eq!((sim.peek(0x6C) >> 16) & 0x1FF, 0x66);
        assert_eq!(sim.peek(0x6C) & 0x1FF, 100);
    }

    #[test]
    fn test_remote_block_offset() {
        let sim = SimulatedTmu::new();
        let trips = TripTable::new(vec![TripPoint::new(90_000, 0)]).unwrap();
        program_thresholds(&sim, &calibration(), &trips, regs::THD_REMOTE_OFFSET);
        assert_eq!(sim.peek(0x5C), 0);
        assert_eq!(sim.peek(0x5C + 0x120) & 0x1FF, 115);
        assert_eq!(sim.peek(0x6C + 0x120) & 0x1FF, 115);
    }

    #[test]
    fn test_interrupt_enable_mask() {
        assert_eq!(interrupt_enable_mask(|i| i < 2), 0x0003_0003);
        assert_eq!(interrupt_enable_mask(|i| i == 7), 0x0080_0080);
        assert_eq!(interrupt_enable_mask(|_| false), 0);
    }
}
