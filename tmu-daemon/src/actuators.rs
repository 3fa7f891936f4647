//! Actuators shipped with the daemon
//!
//! The cooling device drivers themselves live elsewhere. `TracingActuator`
//! stands in for them and records the throttle level it would request;
//! `SysfsCpuHotplug` parks CPUs through the sysfs `online` files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info, warn};

use tmu_core::{CoolingActuator, CoolingKind, CpuHotplug, Result, TmuError};

/// Logs every update and derives a throttle level from the zone's trips
#[derive(Debug)]
pub struct TracingActuator {
    zone: String,
    kind: CoolingKind,
    /// Trip temperatures in °C, coolest first
    trips: Vec<i32>,
    state: AtomicU32,
}

impl TracingActuator {
    pub fn new(zone: &str, kind: CoolingKind, trips: Vec<i32>) -> Self {
        Self {
            zone: zone.to_string(),
            kind,
            trips,
            state: AtomicU32::new(0),
        }
    }
}

impl CoolingActuator for TracingActuator {
    fn kind(&self) -> CoolingKind {
        self.kind
    }

    fn set_current_temperature(&self, celsius: i32, suspended: bool) {
        let level = if suspended {
            0
        } else {
            self.trips.iter().take_while(|&&t| celsius >= t).count() as u32
        };
        let previous = self.state.swap(level, Ordering::Relaxed);
        if previous != level {
            info!(zone = %self.zone, cooling = %self.kind, celsius, level, suspended, "Throttle level changed");
        } else {
            debug!(zone = %self.zone, celsius, suspended, "Temperature update");
        }
    }

    fn throttle_state(&self) -> u32 {
        self.state.load(Ordering::Relaxed)
    }

    fn reset_throttle_state(&self) {
        self.state.store(0, Ordering::Relaxed);
        debug!(zone = %self.zone, "Throttle state reset");
    }
}

/// CPU parking through `/sys/devices/system/cpu/cpuN/online`
#[derive(Debug, Clone)]
pub struct SysfsCpuHotplug {
    root: PathBuf,
    /// CPUs that may be taken offline, lowest first
    cpus: Vec<u32>,
}

impl SysfsCpuHotplug {
    pub fn new(root: impl Into<PathBuf>, mut cpus: Vec<u32>) -> Self {
        cpus.sort_unstable();
        cpus.dedup();
        Self {
            root: root.into(),
            cpus,
        }
    }

    fn online_path(&self, cpu: u32) -> PathBuf {
        self.root.join(format!("cpu{}", cpu)).join("online")
    }

    fn write_online(&self, cpu: u32, online: bool) -> Result<()> {
        let path = self.online_path(cpu);
        fs::write(&path, if online { "1" } else { "0" })
            .map_err(|e| TmuError::generic(format!("{}: {}", path.display(), e)))
    }

    /// Number of `cpuN` directories under the root
    fn present_cpus(&self) -> Result<usize> {
        let count = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_cpu_dir(&entry.path()))
            .count();
        Ok(count)
    }
}

fn is_cpu_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("cpu"))
        .map_or(false, |id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

impl CpuHotplug for SysfsCpuHotplug {
    fn request_online_cpus(&self, count: usize) -> Result<()> {
        let mut online = self.present_cpus()?;
        for &cpu in self.cpus.iter().rev() {
            if online <= count {
                break;
            }
            self.write_online(cpu, false)?;
            online -= 1;
        }
        info!(online, requested = count, "CPU online limit applied");
        Ok(())
    }

    fn restore_default(&self) -> Result<()> {
        let mut first_error = None;
        for &cpu in &self.cpus {
            if let Err(e) = self.write_online(cpu, true) {
                warn!(cpu, error = %e, "Failed to bring CPU online");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cpu_tree(count: u32) -> TempDir {
        let dir = TempDir::new().unwrap();
        for cpu in 0..count {
            let cpu_dir = dir.path().join(format!("cpu{}", cpu));
            fs::create_dir(&cpu_dir).unwrap();
            fs::write(cpu_dir.join("online"), "1").unwrap();
        }
        fs::create_dir(dir.path().join("cpufreq")).unwrap();
        dir
    }

    fn online(dir: &TempDir, cpu: u32) -> String {
        fs::read_to_string(dir.path().join(format!("cpu{}/online", cpu))).unwrap()
    }

    #[test]
    fn test_park_and_restore() {
        let dir = cpu_tree(8);
        let hotplug = SysfsCpuHotplug::new(dir.path(), vec![7, 4, 5, 6]);

        hotplug.request_online_cpus(4).unwrap();
        assert_eq!(online(&dir, 3), "1");
        for cpu in 4..8 {
            assert_eq!(online(&dir, cpu), "0");
        }

        hotplug.restore_default().unwrap();
        for cpu in 4..8 {
            assert_eq!(online(&dir, cpu), "1");
        }
    }

    #[test]
    fn test_partial_park() {
        let dir = cpu_tree(8);
        let hotplug = SysfsCpuHotplug::new(dir.path(), vec![4, 5, 6, 7]);
        hotplug.request_online_cpus(6).unwrap();
        assert_eq!(online(&dir, 5), "1");
        assert_eq!(online(&dir, 6), "0");
        assert_eq!(online(&dir, 7), "0");
    }

    #[test]
    fn test_tracing_actuator_levels() {
        let actuator = TracingActuator::new("cpu", CoolingKind::CpuFreq, vec![60, 80]);
        actuator.set_current_temperature(50, false);
        assert_eq!(actuator.throttle_state(), 0);
        actuator.set_current_temperature(70, false);
        assert_eq!(actuator.throttle_state(), 1);
        actuator.set_current_temperature(85, false);
        assert_eq!(actuator.throttle_state(), 2);
        actuator.reset_throttle_state();
        assert_eq!(actuator.throttle_state(), 0);
        actuator.set_current_temperature(90, false);
        actuator.set_current_temperature(0, true);
        assert_eq!(actuator.throttle_state(), 0);
    }
}
