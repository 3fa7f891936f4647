/*
 * Engine tests for tmu-core
 *
 * Drive whole devices against the simulated register file: configuration
 * to probe, interrupts through the bridge, the hotplug band on the read
 * path, suspend and resume through the registry.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;
use serial_test::serial;
use tmu_core::constants::regs;
use tmu_core::hw::read_threshold;
use tmu_core::{
    open_backend, parse_config, CoolingCoordinator, CpuHotplug, DeviceConfig, DeviceRegistry,
    FireOutcome, HotplugLatch, Lifecycle, Result, SimulatedTmu, SoftIrqLine, StaticZone,
    TemperatureSource, ThermalDevice, ThermalZone, TmuError, TripPoint, ZoneEvent,
};

const WAIT: Duration = Duration::from_secs(5);

const CONFIG: &str = r#"{
    "version": 1,
    "devices": [
        {
            "id": 0,
            "name": "cpu",
            "compatible": "samsung,exynos8890-tmu",
            "backend": { "kind": "simulated", "trim": [50], "initial_code": 65 },
            "zone": { "trips": [
                { "temperature_mc": 60000, "hysteresis_mc": 5000 },
                { "temperature_mc": 80000, "hysteresis_mc": 5000 }
            ] },
            "hotplug": { "in_threshold": 60, "out_threshold": 70, "cpus": [4, 5, 6, 7] }
        },
        {
            "id": 1,
            "name": "gpu",
            "compatible": "samsung,exynos8895-tmu",
            "backend": { "kind": "simulated", "trim": [50, 50, 50], "initial_code": 70 },
            "sensors": 7,
            "sensing_method": "avg",
            "zone": { "governor": "power_allocator", "trips": [
                { "temperature_mc": 90000, "hysteresis_mc": 2000 }
            ] }
        }
    ]
}"#;

#[derive(Default)]
struct RecordingHotplug {
    requests: Mutex<Vec<usize>>,
    restores: AtomicUsize,
}

impl CpuHotplug for RecordingHotplug {
    fn request_online_cpus(&self, count: usize) -> Result<()> {
        self.requests.lock().push(count);
        Ok(())
    }

    fn restore_default(&self) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn probe(
    config: &DeviceConfig,
    registry: &DeviceRegistry,
    hotplug: &Arc<RecordingHotplug>,
) -> (Arc<ThermalDevice>, Arc<StaticZone>) {
    let io = open_backend(&config.backend).unwrap();
    let zone = Arc::new(StaticZone::from_config(&config.name, &config.zone));
    let mut coordinator = CoolingCoordinator::new(registry.gate());
    if let Some(h) = &config.hotplug {
        coordinator = coordinator.with_hotplug(h.policy().unwrap(), hotplug.clone(), HotplugLatch::global());
    }
    let device = ThermalDevice::probe(
        &config.descriptor().unwrap(),
        io,
        Arc::new(SoftIrqLine::new()),
        zone.clone(),
        coordinator,
    )
    .unwrap();
    (registry.register(device).unwrap(), zone)
}

#[test]
#[serial]
fn test_config_to_running_devices() {
    HotplugLatch::global().reset();
    let config = parse_config(CONFIG).unwrap();
    let registry = DeviceRegistry::new();
    let hotplug = Arc::new(RecordingHotplug::default());

    let (cpu, _) = probe(&config.devices[0], &registry, &hotplug);
    let (gpu, gpu_zone) = probe(&config.devices[1], &registry, &hotplug);

    assert_eq!(cpu.read_temperature().unwrap(), 40_000);
    assert_eq!(gpu.read_temperature().unwrap(), 45_000);

    // Passive zone: readable, nothing programmed, polled only
    let snap = gpu.snapshot();
    assert!(snap.passive);
    assert_eq!(snap.aggregation, "avg");
    assert_eq!(gpu.poll().unwrap(), 45_000);
    assert_eq!(gpu_zone.last_temperature(), Some(45_000));

    assert_eq!(registry.snapshots().len(), 2);
    registry.remove_all();
    assert_eq!(cpu.state().stage, Lifecycle::Removed);
}

#[test]
#[serial]
fn test_hotplug_band_on_read_path() {
    HotplugLatch::global().reset();
    let config = parse_config(CONFIG).unwrap();
    let registry = DeviceRegistry::new();
    let hotplug = Arc::new(RecordingHotplug::default());
    let (cpu, _) = probe(&config.devices[0], &registry, &hotplug);

    for celsius in [50, 65, 72, 68, 59] {
        cpu.set_emulation(celsius * 1000).unwrap();
        assert_eq!(cpu.read_temperature().unwrap(), celsius * 1000);
    }

    assert_eq!(*hotplug.requests.lock(), vec![4]);
    assert_eq!(hotplug.restores.load(Ordering::SeqCst), 1);
    assert_eq!(cpu.snapshot().state.hotplug_parked, Some(false));
    registry.remove_all();
}

#[test]
#[serial]
fn test_removal_unparks_cpus() {
    HotplugLatch::global().reset();
    let config = parse_config(CONFIG).unwrap();
    let registry = DeviceRegistry::new();
    let hotplug = Arc::new(RecordingHotplug::default());
    let (cpu, _) = probe(&config.devices[0], &registry, &hotplug);

    assert_eq!(cpu.state().hotplug_parked, Some(false));
    cpu.set_emulation(75_000).unwrap();
    cpu.read_temperature().unwrap();
    assert!(HotplugLatch::global().is_parked());
    assert_eq!(cpu.state().hotplug_parked, Some(true));

    registry.unregister("cpu").unwrap();
    assert!(!HotplugLatch::global().is_parked());
    assert_eq!(cpu.state().hotplug_parked, Some(false));
    assert_eq!(hotplug.restores.load(Ordering::SeqCst), 1);
}

/// Zone whose update blocks until released
struct BlockingZone {
    inner: StaticZone,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
    updates: AtomicUsize,
}

impl ThermalZone for BlockingZone {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn governor(&self) -> &str {
        self.inner.governor()
    }

    fn trip_count(&self) -> usize {
        self.inner.trip_count()
    }

    fn trip(&self, index: usize) -> Option<TripPoint> {
        self.inner.trip(index)
    }

    fn is_trip_valid(&self, index: usize) -> bool {
        self.inner.is_trip_valid(index)
    }

    fn update(&self, source: &dyn TemperatureSource) -> Result<i32> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.entered.lock().take() {
            let _ = tx.send(());
        }
        if let Some(rx) = self.release.lock().take() {
            let _ = rx.recv();
        }
        self.inner.update(source)
    }

    fn last_temperature(&self) -> Option<i32> {
        self.inner.last_temperature()
    }

    fn notify(&self, event: ZoneEvent) {
        self.inner.notify(event)
    }
}

#[test]
fn test_interrupts_coalesce_end_to_end() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let config = parse_config(CONFIG).unwrap();
    let cfg = &config.devices[0];

    let zone = Arc::new(BlockingZone {
        inner: StaticZone::from_config("cpu", &cfg.zone),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(Some(release_rx)),
        updates: AtomicUsize::new(0),
    });
    let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
    let line = Arc::new(SoftIrqLine::new());
    let device = ThermalDevice::probe(
        &cfg.descriptor().unwrap(),
        sim.clone(),
        line.clone(),
        zone.clone(),
        CoolingCoordinator::detached(),
    )
    .unwrap();

    sim.raise_pending(0, 0x1);
    assert_eq!(device.fire_interrupt(), FireOutcome::Scheduled);
    entered_rx.recv_timeout(WAIT).unwrap();

    // Worker is inside the zone callback without the device lock
    assert!(device.read_channel_temperature(0).is_ok());
    assert_eq!(device.fire_interrupt(), FireOutcome::Coalesced);

    release_tx.send(()).unwrap();
    assert!(device.wait_irq_idle(WAIT));

    assert_eq!(zone.updates.load(Ordering::SeqCst), 1);
    assert_eq!(line.enable_count(), 1);
    assert_eq!(sim.peek(regs::INTPEND0), 0);
    device.remove();
}

#[test]
fn test_thresholds_follow_primary_calibration() {
    let config = parse_config(CONFIG).unwrap();
    let cfg = &config.devices[0];
    let sim = Arc::new(SimulatedTmu::with_trims(&[50]));
    let device = ThermalDevice::probe(
        &cfg.descriptor().unwrap(),
        sim.clone(),
        Arc::new(SoftIrqLine::new()),
        Arc::new(StaticZone::from_config("cpu", &cfg.zone)),
        CoolingCoordinator::detached(),
    )
    .unwrap();

    // 60 °C and 80 °C rising, 55 °C and 75 °C falling
    assert_eq!(read_threshold(sim.as_ref(), 0, 0), (85, 80));
    assert_eq!(read_threshold(sim.as_ref(), 0, 1), (105, 100));
    assert_eq!(sim.peek(regs::INTEN), 0x0003_0003);

    // Emulation moves the readout, not the comparator setup
    device.set_emulation(99_000).unwrap();
    assert_eq!(device.read_temperature().unwrap(), 99_000);
    assert_eq!(read_threshold(sim.as_ref(), 0, 1), (105, 100));
    device.set_emulation(0).unwrap();
    assert!(matches!(device.set_emulation(500), Err(TmuError::InvalidArgument(_))));
    device.remove();
}

#[test]
#[serial]
fn test_registry_suspend_resume_is_idempotent() {
    HotplugLatch::global().reset();
    let config = parse_config(CONFIG).unwrap();
    let registry = DeviceRegistry::new();
    let hotplug = Arc::new(RecordingHotplug::default());
    let (cpu, _) = probe(&config.devices[0], &registry, &hotplug);
    let io = cpu.controller().hw().io.clone();

    let image = || {
        (0x50..=0x6C)
            .step_by(4)
            .map(|off| io.read32(off))
            .collect::<Vec<_>>()
    };
    let programmed = image();
    let inten = io.read32(regs::INTEN);

    registry.suspend_all();
    assert!(cpu.state().suspended);
    assert_eq!(io.read32(regs::INTEN), 0);
    assert!(registry.gate().is_suspended());

    registry.resume_all().unwrap();
    assert_eq!(image(), programmed);
    assert_eq!(io.read32(regs::INTEN), inten);
    assert_eq!(cpu.state().stage, Lifecycle::Enabled);
    assert!(!registry.gate().is_suspended());
    registry.remove_all();
}

#[test]
fn test_second_bank_channel_keeps_emulation_register() {
    let config = parse_config(
        r#"{
        "version": 1,
        "devices": [{
            "id": 2,
            "name": "isp",
            "compatible": "samsung,exynos8895-tmu",
            "backend": { "kind": "simulated", "trim": [50, 50, 50, 50, 50, 50], "initial_code": 100 },
            "sensors": 33,
            "sensing_method": "max",
            "zone": { "trips": [{ "temperature_mc": 90000, "hysteresis_mc": 5000 }] }
        }]
    }"#,
    )
    .unwrap();
    let registry = DeviceRegistry::new();
    let hotplug = Arc::new(RecordingHotplug::default());
    let (isp, _) = probe(&config.devices[0], &registry, &hotplug);
    let io = isp.controller().hw().io.clone();

    assert_eq!(io.read32(regs::EMUL_CON), 0);
    assert_eq!(io.read32(regs::INTEN), 0x0001_0001);
    assert_eq!(io.read32(regs::INTEN5), 0x0001_0001);
    assert_eq!(isp.read_temperature().unwrap(), 75_000);
    assert_eq!(isp.state().emulation_mc, None);

    // A user emulation survives a disable/enable cycle of the channels
    isp.set_emulation(60_000).unwrap();
    let emul = io.read32(regs::EMUL_CON);
    registry.suspend_all();
    assert_eq!(io.read32(regs::EMUL_CON), emul);
    assert_eq!(io.read32(regs::INTEN5), 0);
    registry.resume_all().unwrap();
    assert_eq!(io.read32(regs::EMUL_CON), emul);
    assert_eq!(isp.read_temperature().unwrap(), 60_000);
    registry.remove_all();
}
