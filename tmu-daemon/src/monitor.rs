//! Device bring-up and the poll loop
//!
//! Builds every configured device into a [`DeviceRegistry`], starts the UIO
//! listeners and drives the periodic zone update. Passive zones depend on
//! this loop entirely; interrupt-driven zones use it as a backstop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tmu_core::constants::hotplug;
use tmu_core::{
    open_backend, CoolingCoordinator, CoolingKind, DeviceConfig, DeviceRegistry, HotplugLatch,
    IrqLine, SoftIrqLine, StaticZone, ThermalDevice, TmuConfig,
};

use crate::actuators::{SysfsCpuHotplug, TracingActuator};
use crate::irq_source::{spawn_listener, UioLine};

/// Consecutive failing poll rounds before the error is repeated in the log
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

pub struct Monitor {
    registry: Arc<DeviceRegistry>,
    poll_interval: Duration,
    listeners: Vec<JoinHandle<()>>,
    listener_shutdown: Arc<AtomicBool>,
}

fn build_coordinator(config: &DeviceConfig, registry: &DeviceRegistry) -> anyhow::Result<CoolingCoordinator> {
    let mut coordinator = CoolingCoordinator::new(registry.gate());

    if config.cooling.kind != CoolingKind::None {
        let trips = config
            .zone
            .trips
            .iter()
            .filter(|t| t.valid)
            .map(|t| t.trip_point().rising_celsius())
            .collect();
        let actuator = TracingActuator::new(&config.name, config.cooling.kind, trips);
        coordinator = coordinator.with_actuator(Arc::new(actuator), config.cooling.report_temperature);
    }

    if let Some(h) = &config.hotplug {
        let policy = h.policy()?;
        let cpus = SysfsCpuHotplug::new(hotplug::CPU_SYSFS_ROOT, h.cpus.clone());
        coordinator = coordinator.with_hotplug(policy, Arc::new(cpus), HotplugLatch::global());
    }

    Ok(coordinator)
}

/// Probe one configured device
fn build_device(config: &DeviceConfig, registry: &DeviceRegistry) -> anyhow::Result<ThermalDevice> {
    let descriptor = config.descriptor()?;
    let io = open_backend(&config.backend)
        .with_context(|| format!("opening register window for {}", config.name))?;

    let line: Arc<dyn IrqLine> = match &config.uio {
        Some(path) => Arc::new(
            UioLine::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Arc::new(SoftIrqLine::new()),
    };

    let zone = Arc::new(StaticZone::from_config(&config.name, &config.zone));
    let coordinator = build_coordinator(config, registry)?;

    let device = ThermalDevice::probe(&descriptor, io, line, zone, coordinator)
        .with_context(|| format!("probing {}", config.name))?;
    Ok(device)
}

impl Monitor {
    /// Probe every device. Devices that fail are logged and skipped.
    pub fn start(config: &TmuConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        let listener_shutdown = Arc::new(AtomicBool::new(false));
        let mut listeners = Vec::new();

        for device_config in &config.devices {
            let device = match build_device(device_config, &registry) {
                Ok(device) => device,
                Err(e) => {
                    let reason = format!("{:#}", e);
                    error!(device = %device_config.name, error = %reason, "Device probe failed");
                    continue;
                }
            };
            let device = registry.register(device)?;

            if let Some(path) = &device_config.uio {
                match spawn_listener(device.name(), path, device.irq_handle(), listener_shutdown.clone()) {
                    Ok(handle) => listeners.push(handle),
                    Err(e) => warn!(
                        device = device.name(),
                        error = %e,
                        "UIO listener failed to start; device runs on polling only"
                    ),
                }
            }
        }

        if registry.is_empty() {
            bail!("no TMU device could be probed");
        }
        info!(devices = registry.len(), listeners = listeners.len(), "Monitor started");

        Ok(Self {
            registry,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            listeners,
            listener_shutdown,
        })
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Stop listeners, then remove every device
    pub fn shutdown(self) {
        self.listener_shutdown.store(true, Ordering::SeqCst);
        self.registry.remove_all();
        for handle in self.listeners {
            if handle.join().is_err() {
                warn!("UIO listener panicked");
            }
        }
        info!("Monitor stopped");
    }
}

/// One synchronous zone update per device. Returns the failures.
pub fn poll_once(registry: &DeviceRegistry) -> Vec<String> {
    let mut failures = Vec::new();
    for device in registry.devices() {
        if device.state().suspended {
            continue;
        }
        match device.poll() {
            Ok(temperature_mc) => debug!(device = device.name(), temperature_mc, "Polled"),
            Err(e) => failures.push(format!("{}: {}", device.name(), e)),
        }
    }
    failures
}

pub async fn run_poll_loop(
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "Poll loop starting");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut consecutive_errors: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let round = Arc::clone(&registry);
        let failures = match tokio::task::spawn_blocking(move || poll_once(&round)).await {
            Ok(failures) => failures,
            Err(e) => vec![format!("poll task failed: {}", e)],
        };

        if failures.is_empty() {
            if consecutive_errors > 0 {
                debug!("Poll loop recovered after {} errors", consecutive_errors);
                consecutive_errors = 0;
            }
            continue;
        }

        consecutive_errors += 1;
        if consecutive_errors == 1 || consecutive_errors % MAX_CONSECUTIVE_ERRORS == 0 {
            error!(count = consecutive_errors, failures = %failures.join("; "), "Poll round failed");
        }
    }

    info!("Poll loop stopped");
}
