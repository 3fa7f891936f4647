//! Constants for the TMU engine
//!
//! Register map, bit fields, temperature domain and runtime defaults.
//! Every other module pulls its magic numbers from here.

use std::time::Duration;

/// Temperature domain
pub mod temperature {
    /// Milli-degrees per degree Celsius
    pub const MCELSIUS: i32 = 1000;

    /// Lowest temperature the sensor reports or can be programmed with (°C)
    pub const MIN_CELSIUS: i32 = 10;

    /// Highest temperature the sensor reports or can be programmed with (°C)
    pub const MAX_CELSIUS: i32 = 125;

    /// Smallest non-zero emulation value accepted (m°C)
    pub const MIN_EMULATION_MC: i32 = MCELSIUS;

    /// Largest emulation value accepted over IPC (m°C)
    pub const MAX_EMULATION_MC: i32 = MAX_CELSIUS * MCELSIUS;
}

/// Sensor geometry
pub mod sensor {
    /// Physical channels per TMU instance
    pub const MAX_CHANNELS: usize = 8;

    /// Trip levels the threshold registers can hold
    pub const MAX_TRIPS: usize = 8;

    /// Width mask of one temperature code
    pub const CODE_MASK: u32 = 0x1FF;

    /// Bit stride between packed channel codes
    pub const CODE_SHIFT: u32 = 9;

    /// Channels packed in CURRENT_TEMP1_0
    pub const CHANNELS_IN_FIRST_REG: usize = 2;

    /// Channels packed in every following CURRENT_TEMP register
    pub const CHANNELS_PER_REG: usize = 3;
}

/// Register offsets relative to the TMU base address
pub mod regs {
    pub const TRIMINFO: u32 = 0x0;
    pub const TRIMINFO1: u32 = 0x4;
    pub const TRIMINFO2: u32 = 0x8;
    pub const CONTROL: u32 = 0x20;
    pub const STATUS: u32 = 0x28;
    pub const AVG_CON: u32 = 0x38;
    pub const CURRENT_TEMP1_0: u32 = 0x40;
    pub const CURRENT_TEMP4_2: u32 = 0x44;
    pub const CURRENT_TEMP7_5: u32 = 0x48;
    pub const THD_TEMP_RISE7_6: u32 = 0x50;
    pub const THD_TEMP_FALL7_6: u32 = 0x60;
    pub const INTEN: u32 = 0x110;
    pub const INTPEND0: u32 = 0x118;
    pub const INTEN5: u32 = 0x310;
    pub const INTPEND5: u32 = 0x318;
    pub const EMUL_CON: u32 = 0x160;

    /// Threshold block of the remote channels on multi-channel parts
    pub const THD_REMOTE_OFFSET: u32 = 0x120;

    /// Stride between per-channel INTEN / INTPEND registers
    pub const CHANNEL_STRIDE: u32 = 0x10;

    /// Stride between per-channel TRIMINFO words
    pub const TRIM_STRIDE: u32 = 0x4;

    /// Channels whose INTEN / INTPEND registers live in the first bank
    pub const FIRST_BANK_CHANNELS: usize = 5;

    /// Size of the register window
    pub const WINDOW_SIZE: u32 = 0x400;
}

/// Bit fields inside the registers above
pub mod bits {
    // TRIMINFO
    pub const CALIB_SEL_SHIFT: u32 = 23;
    pub const CALIB_SEL_MASK: u32 = 0x1;
    pub const TRIM_SECOND_POINT_SHIFT: u32 = 9;
    pub const T_BUF_VREF_SEL_SHIFT: u32 = 18;
    pub const T_BUF_VREF_SEL_MASK: u32 = 0x1F;
    pub const T_BUF_SLOPE_SEL_SHIFT: u32 = 18;
    pub const T_BUF_SLOPE_SEL_MASK: u32 = 0xF;

    // CONTROL
    pub const REF_VOLTAGE_SHIFT: u32 = 24;
    pub const REF_VOLTAGE_MASK: u32 = 0x1F;
    pub const BUF_SLOPE_SEL_SHIFT: u32 = 8;
    pub const BUF_SLOPE_SEL_MASK: u32 = 0xF;
    pub const TRIP_MODE_SHIFT: u32 = 13;
    pub const TRIP_MODE_MASK: u32 = 0x7;
    pub const CORE_EN: u32 = 1 << 0;
    pub const THERM_TRIP_EN: u32 = 1 << 12;

    // INTEN
    pub const INTEN_RISE0_SHIFT: u32 = 0;
    pub const INTEN_FALL0_SHIFT: u32 = 16;

    // AVG_CON
    pub const AVG_SEL_SHIFT: u32 = 18;
    pub const AVG_SEL_MASK: u32 = 0x3;
    pub const AVG_MODE_MASK: u32 = 0x7;
    pub const AVG_MODE_4: u32 = 0x6;

    // EMUL_CON
    pub const EMUL_DATA_SHIFT: u32 = 7;
    pub const EMUL_DATA_MASK: u32 = 0x1FF;
    pub const EMUL_ENABLE: u32 = 0x1;

    /// Bit position of the upper threshold slot inside a packed register
    pub const THRESHOLD_SLOT_SHIFT: u32 = 16;
}

/// Governor names with special handling
pub mod governor {
    /// Polling-only governor; zones using it never get threshold interrupts
    pub const POWER_ALLOCATOR: &str = "power_allocator";

    pub const DEFAULT: &str = "step_wise";
}

/// CPU hotplug defaults
pub mod hotplug {
    /// CPUs left online while the big cluster is parked
    pub const DEFAULT_PARKED_ONLINE: usize = 4;

    /// sysfs root of the CPU devices
    pub const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";
}

/// File system paths
pub mod paths {
    use std::path::PathBuf;

    /// System-wide configuration directory
    pub const CONFIG_DIR: &str = "/etc/tmu";

    /// Configuration file name
    pub const CONFIG_FILE: &str = "tmu.json";

    /// Default daemon socket
    pub const SOCKET_PATH: &str = "/run/tmud.sock";

    /// Path of the system-wide configuration file
    pub fn system_config_path() -> PathBuf {
        PathBuf::from(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Per-user configuration file, used when no system file exists
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tmu").join(CONFIG_FILE))
    }
}

/// Size limits
pub mod limits {
    /// Largest configuration file accepted
    pub const MAX_CONFIG_FILE_SIZE: u64 = 256 * 1024;

    /// Largest IPC message accepted in either direction
    pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

    /// Longest zone name accepted
    pub const MAX_ZONE_NAME_LEN: usize = 64;

    /// Zone events kept for inspection
    pub const ZONE_EVENT_HISTORY: usize = 32;
}

/// Timing values
pub mod timing {
    use super::Duration;

    /// Default poll interval for passive zones
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// Shortest poll interval a configuration may request
    pub const MIN_POLL_INTERVAL_MS: u64 = 50;

    /// How long teardown waits for the interrupt worker to drain
    pub const IRQ_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Configuration file format version
pub const CONFIG_VERSION: u32 = 1;
