//! Register access
//!
//! `RegisterIo` is the seam between the engine and the hardware. Accesses are
//! infallible 32-bit operations at byte offsets from the TMU base, like MMIO.
//! Callers serialize read-modify-write sequences through the device lock.
//!
//! Two backends ship with the crate:
//! - [`SimulatedTmu`]: an in-process register file that models the
//!   write-one-to-clear pending registers and the emulation override
//! - [`DevMemWindow`]: the physical register window mapped from `/dev/mem`

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::constants::{bits, regs, sensor};
use tmu_error::{Result, TmuError};

/// 32-bit register window
pub trait RegisterIo: Send + Sync {
    fn read32(&self, offset: u32) -> u32;

    fn write32(&self, offset: u32, value: u32);

    /// Low half-word of a register
    fn read16(&self, offset: u32) -> u16 {
        (self.read32(offset) & 0xFFFF) as u16
    }

    /// Clear `clear`, then set `set`, in one read-modify-write
    fn modify32(&self, offset: u32, clear: u32, set: u32) {
        let value = (self.read32(offset) & !clear) | set;
        self.write32(offset, value);
    }
}

// ============================================================================
// Register layout helpers
// ============================================================================

/// CURRENT_TEMP register and bit position of a channel's code.
///
/// Channels 0 and 1 share CURRENT_TEMP1_0; the rest are packed three per
/// register at a 4-byte stride.
pub fn current_temp_slot(channel: usize) -> (u32, u32) {
    if channel < sensor::CHANNELS_IN_FIRST_REG {
        (regs::CURRENT_TEMP1_0, sensor::CODE_SHIFT * channel as u32)
    } else {
        let rel = channel - sensor::CHANNELS_IN_FIRST_REG;
        let reg = ((rel / sensor::CHANNELS_PER_REG) as u32 + 1) * 4;
        let shift = sensor::CODE_SHIFT * (rel % sensor::CHANNELS_PER_REG) as u32;
        (regs::CURRENT_TEMP1_0 + reg, shift)
    }
}

fn banked_offset(first: u32, second: u32, channel: usize) -> u32 {
    if channel < regs::FIRST_BANK_CHANNELS {
        first + regs::CHANNEL_STRIDE * channel as u32
    } else {
        second + regs::CHANNEL_STRIDE * (channel - regs::FIRST_BANK_CHANNELS) as u32
    }
}

/// Interrupt pending register of a channel.
///
/// The first five channels sit in one bank at INTPEND0; the rest in a second
/// bank starting at INTPEND5, both at the per-channel stride.
pub fn intpend_offset(channel: usize) -> u32 {
    banked_offset(regs::INTPEND0, regs::INTPEND5, channel)
}

/// Interrupt enable register of a channel. Banked like INTPEND; the first
/// bank would run into EMUL_CON at channel 5.
pub fn inten_offset(channel: usize) -> u32 {
    banked_offset(regs::INTEN, regs::INTEN5, channel)
}

/// TRIMINFO word of a channel
pub fn trim_offset(channel: usize) -> u32 {
    regs::TRIMINFO + regs::TRIM_STRIDE * channel as u32
}

fn is_current_temp(offset: u32) -> bool {
    matches!(
        offset,
        regs::CURRENT_TEMP1_0 | regs::CURRENT_TEMP4_2 | regs::CURRENT_TEMP7_5
    )
}

fn is_intpend(offset: u32) -> bool {
    (0..sensor::MAX_CHANNELS).any(|ch| intpend_offset(ch) == offset)
}

// ============================================================================
// Simulated register file
// ============================================================================

/// In-process TMU register file.
///
/// Unwritten registers read as zero. Writes to INTPEND registers clear the
/// bits written as one. While EMUL_CON has its enable bit set, every channel
/// of CURRENT_TEMP reports the emulated code.
#[derive(Debug, Default)]
pub struct SimulatedTmu {
    registers: Mutex<BTreeMap<u32, u32>>,
}

impl SimulatedTmu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file with the given TRIMINFO word per channel
    pub fn with_trims(trims: &[u32]) -> Self {
        let sim = Self::new();
        {
            let mut map = sim.registers.lock();
            for (channel, trim) in trims.iter().enumerate().take(sensor::MAX_CHANNELS) {
                map.insert(trim_offset(channel), *trim);
            }
        }
        sim
    }

    /// Load a raw code into one channel's CURRENT_TEMP field
    pub fn set_channel_code(&self, channel: usize, code: u16) {
        let (offset, shift) = current_temp_slot(channel);
        let mut map = self.registers.lock();
        let value = map.entry(offset).or_insert(0);
        *value &= !(sensor::CODE_MASK << shift);
        *value |= (code as u32 & sensor::CODE_MASK) << shift;
    }

    /// Load the same code into every channel
    pub fn set_all_codes(&self, code: u16) {
        for channel in 0..sensor::MAX_CHANNELS {
            self.set_channel_code(channel, code);
        }
    }

    /// Latch pending bits for a channel, as the comparator would
    pub fn raise_pending(&self, channel: usize, pending: u32) {
        let mut map = self.registers.lock();
        *map.entry(intpend_offset(channel)).or_insert(0) |= pending;
    }

    /// Raw register value, bypassing the read side effects
    pub fn peek(&self, offset: u32) -> u32 {
        self.registers.lock().get(&offset).copied().unwrap_or(0)
    }

    /// Copy of every register written so far
    pub fn snapshot(&self) -> BTreeMap<u32, u32> {
        self.registers.lock().clone()
    }

    fn emulated_code(map: &BTreeMap<u32, u32>) -> Option<u32> {
        let emul = map.get(&regs::EMUL_CON).copied().unwrap_or(0);
        (emul & bits::EMUL_ENABLE != 0).then(|| (emul >> bits::EMUL_DATA_SHIFT) & bits::EMUL_DATA_MASK)
    }
}

impl RegisterIo for SimulatedTmu {
    fn read32(&self, offset: u32) -> u32 {
        let map = self.registers.lock();
        if is_current_temp(offset) {
            if let Some(code) = Self::emulated_code(&map) {
                let fields = if offset == regs::CURRENT_TEMP1_0 { 2 } else { 3 };
                return (0..fields).fold(0, |acc, i| acc | code << (sensor::CODE_SHIFT * i));
            }
        }
        map.get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut map = self.registers.lock();
        if is_intpend(offset) {
            let pending = map.entry(offset).or_insert(0);
            *pending &= !value;
        } else {
            map.insert(offset, value);
        }
    }
}

// ============================================================================
// /dev/mem window
// ============================================================================

/// Physical register window mapped with `mmap` on `/dev/mem`
#[derive(Debug)]
pub struct DevMemWindow {
    base: NonNull<u8>,
    map_len: usize,
    page_offset: usize,
    size: u32,
}

// SAFETY: the mapping is owned by this struct and only touched through
// volatile 32-bit accesses; callers serialize read-modify-write sequences.
unsafe impl Send for DevMemWindow {}
// SAFETY: see above.
unsafe impl Sync for DevMemWindow {}

impl DevMemWindow {
    pub fn open(address: u64, size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(|e| TmuError::Mapping {
                address,
                reason: format!("cannot open /dev/mem: {}", e),
            })?;

        // SAFETY: sysconf has no preconditions.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page = if page > 0 { page as u64 } else { 4096 };
        let aligned = address & !(page - 1);
        let page_offset = (address - aligned) as usize;
        let map_len = page_offset + size as usize;

        // SAFETY: mapping a fresh region of the opened fd; the result is
        // checked against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                aligned as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(TmuError::Mapping {
                address,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        let base = NonNull::new(ptr as *mut u8).ok_or_else(|| TmuError::Mapping {
            address,
            reason: "mmap returned null".into(),
        })?;

        debug!(address = %format!("{:#x}", address), size, "Mapped TMU register window");
        Ok(Self {
            base,
            map_len,
            page_offset,
            size,
        })
    }

    fn checked(&self, offset: u32) -> Option<*mut u32> {
        if offset % 4 != 0 || offset.checked_add(4).map_or(true, |end| end > self.size) {
            error!(
                offset = %format!("{:#x}", offset),
                "{}",
                TmuError::RegisterOutOfRange {
                    offset,
                    size: self.size
                }
            );
            return None;
        }
        // SAFETY: offset is in bounds of the mapping and 4-byte aligned.
        Some(unsafe { self.base.as_ptr().add(self.page_offset + offset as usize) } as *mut u32)
    }
}

impl RegisterIo for DevMemWindow {
    fn read32(&self, offset: u32) -> u32 {
        match self.checked(offset) {
            // SAFETY: pointer validated by `checked`.
            Some(reg) => unsafe { ptr::read_volatile(reg) },
            None => 0,
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        if let Some(reg) = self.checked(offset) {
            // SAFETY: pointer validated by `checked`.
            unsafe { ptr::write_volatile(reg, value) }
        }
    }
}

impl Drop for DevMemWindow {
    fn drop(&mut self) {
        // SAFETY: base/map_len describe the mapping created in `open`.
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.map_len);
        }
    }
}
