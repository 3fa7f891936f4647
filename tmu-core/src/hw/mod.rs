//! Hardware access: register windows, threshold packing and SoC variants

mod exynos8890;
mod exynos8895;
pub mod regs;
pub mod threshold;
mod variant;

use std::sync::Arc;

use tracing::info;

use crate::data::BackendConfig;
use tmu_error::Result;

pub use exynos8890::Exynos8890;
pub use exynos8895::Exynos8895;
pub use regs::{DevMemWindow, RegisterIo, SimulatedTmu};
pub use threshold::{interrupt_enable_mask, program_thresholds, read_threshold, threshold_slot};
pub use variant::{variant_for, TmuHw, TmuVariant};

/// Open the register window a device configuration asks for
pub fn open_backend(backend: &BackendConfig) -> Result<Arc<dyn RegisterIo>> {
    match backend {
        BackendConfig::Simulated { trim, initial_code } => {
            let sim = SimulatedTmu::with_trims(trim);
            sim.set_all_codes(*initial_code);
            info!(channels = trim.len(), initial_code, "Using simulated register file");
            Ok(Arc::new(sim))
        }
        BackendConfig::Devmem { base_address, size } => {
            let window = DevMemWindow::open(*base_address, *size)?;
            info!(base = %format!("{:#x}", base_address), size, "Mapped register window");
            Ok(Arc::new(window))
        }
    }
}
