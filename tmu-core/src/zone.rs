//! Thermal zone abstraction
//!
//! A zone owns the trip definitions and the governor choice. The engine only
//! consumes it: trips are snapshotted at (re)initialization, validity drives
//! the interrupt enable mask, and `update` pulls a fresh reading through a
//! [`TemperatureSource`] whenever an interrupt or the poll loop asks for one.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::constants::{governor, limits, sensor};
use crate::data::{TripConfig, TripPoint, TripTable, ZoneConfig, ZoneEvent};
use tmu_error::Result;

/// Something that can produce a temperature in m°C
pub trait TemperatureSource: Send + Sync {
    fn read_temperature(&self) -> Result<i32>;
}

/// Consumer-side view of a thermal zone
pub trait ThermalZone: Send + Sync {
    fn name(&self) -> &str;

    fn governor(&self) -> &str;

    fn trip_count(&self) -> usize;

    fn trip(&self, index: usize) -> Option<TripPoint>;

    fn is_trip_valid(&self, index: usize) -> bool;

    /// Synchronously read `source` and record it as the zone temperature
    fn update(&self, source: &dyn TemperatureSource) -> Result<i32>;

    fn last_temperature(&self) -> Option<i32>;

    /// Change notification after a trip interrupt
    fn notify(&self, event: ZoneEvent);

    /// Polling-only zone: no thresholds, no interrupts
    fn is_passive(&self) -> bool {
        self.governor() == governor::POWER_ALLOCATOR
    }
}

/// Snapshot of the zone's trips for threshold programming
pub fn trip_table(zone: &dyn ThermalZone) -> Result<TripTable> {
    let trips = (0..zone.trip_count())
        .filter_map(|i| zone.trip(i))
        .collect();
    TripTable::new(trips)
}

/// First trip index whose temperature is above `temperature_mc`, or the
/// trip count when every trip has been crossed.
pub fn trip_level(zone: &dyn ThermalZone, temperature_mc: i32) -> usize {
    let count = zone.trip_count();
    (0..count)
        .find(|&i| {
            zone.trip(i)
                .map_or(false, |trip| temperature_mc < trip.temperature_mc)
        })
        .unwrap_or(count)
}

#[derive(Debug, Default)]
struct ZoneRecord {
    last_temperature: Option<i32>,
    events: VecDeque<ZoneEvent>,
    updates: u64,
}

/// Zone backed by a fixed trip list from the configuration file
#[derive(Debug)]
pub struct StaticZone {
    name: String,
    governor: String,
    trips: Vec<TripConfig>,
    record: Mutex<ZoneRecord>,
}

impl StaticZone {
    pub fn new(name: impl Into<String>, governor: impl Into<String>, trips: Vec<TripConfig>) -> Self {
        Self {
            name: name.into(),
            governor: governor.into(),
            trips: trips.into_iter().take(sensor::MAX_TRIPS).collect(),
            record: Mutex::new(ZoneRecord::default()),
        }
    }

    pub fn from_config(name: &str, config: &ZoneConfig) -> Self {
        Self::new(name, config.governor.clone(), config.trips.clone())
    }

    /// Change notifications received so far, oldest first
    pub fn events(&self) -> Vec<ZoneEvent> {
        self.record.lock().events.iter().cloned().collect()
    }

    pub fn update_count(&self) -> u64 {
        self.record.lock().updates
    }
}

impl ThermalZone for StaticZone {
    fn name(&self) -> &str {
        &self.name
    }

    fn governor(&self) -> &str {
        &self.governor
    }

    fn trip_count(&self) -> usize {
        self.trips.len()
    }

    fn trip(&self, index: usize) -> Option<TripPoint> {
        self.trips.get(index).map(TripConfig::trip_point)
    }

    fn is_trip_valid(&self, index: usize) -> bool {
        self.trips.get(index).map_or(false, |t| t.valid)
    }

    fn update(&self, source: &dyn TemperatureSource) -> Result<i32> {
        let temperature = source.read_temperature()?;
        let mut record = self.record.lock();
        record.last_temperature = Some(temperature);
        record.updates += 1;
        debug!(zone = %self.name, temperature_mc = temperature, "Zone updated");
        Ok(temperature)
    }

    fn last_temperature(&self) -> Option<i32> {
        self.record.lock().last_temperature
    }

    fn notify(&self, event: ZoneEvent) {
        info!(
            zone = %event.zone,
            trip_level = event.trip_level,
            temperature_mc = event.temperature_mc,
            "Trip level changed"
        );
        let mut record = self.record.lock();
        if record.events.len() == limits::ZONE_EVENT_HISTORY {
            record.events.pop_front();
        }
        record.events.push_back(event);
    }
}
