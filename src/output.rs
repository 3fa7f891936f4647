/*
 * This file is part of tmuctl.
 *
 * Copyright (C) 2025 TMU tools contributors
 *
 * tmuctl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tmuctl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tmuctl. If not, see <https://www.gnu.org/licenses/>.
 */

//! Terminal rendering of daemon replies

use std::fmt::Write;

use tmu_protocol::{DeviceStatus, ZoneInfo};

/// `45123` → `45.1 °C`
pub fn format_temperature(millicelsius: i32) -> String {
    format!("{:.1} °C", millicelsius as f64 / 1000.0)
}

fn format_channels(channels: &[u8]) -> String {
    channels
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn format_zones(zones: &[ZoneInfo]) -> String {
    if zones.is_empty() {
        return "No zones registered\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<4} {:<16} {:<24} {:<16} {:<12} {:<8} {}",
        "ID", "ZONE", "VARIANT", "CHANNELS", "SENSING", "MODE", "COOLING"
    );
    for zone in zones {
        let _ = writeln!(
            out,
            "{:<4} {:<16} {:<24} {:<16} {:<12} {:<8} {}",
            zone.id,
            zone.name,
            zone.variant,
            format_channels(&zone.channels),
            zone.aggregation,
            if zone.passive { "polled" } else { "irq" },
            zone.cooling
        );
    }
    out
}

pub fn format_state(state: &DeviceStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} (id {}, {})", state.name, state.id, state.variant);
    let _ = writeln!(out, "  stage:       {}", state.stage);
    let _ = writeln!(out, "  enabled:     {}", state.enabled);
    let _ = writeln!(out, "  suspended:   {}", state.suspended);
    let _ = writeln!(out, "  mode:        {}", if state.passive { "polled" } else { "irq" });
    let _ = writeln!(out, "  cooling:     {}", state.cooling);
    if let Some(mc) = state.last_temperature_mc {
        let _ = writeln!(out, "  temperature: {}", format_temperature(mc));
    }
    if let Some(mc) = state.emulation_mc {
        let _ = writeln!(out, "  emulation:   {}", format_temperature(mc));
    }
    if let Some(parked) = state.hotplug_parked {
        let _ = writeln!(out, "  hotplug:     {}", if parked { "parked" } else { "online" });
    }
    let irq = &state.interrupts;
    let _ = writeln!(
        out,
        "  interrupts:  {} fired, {} coalesced, {} handled",
        irq.fired, irq.coalesced, irq.handled
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmu_protocol::InterruptCounters;

    #[test]
    fn test_format_temperature() {
        assert_eq!(format_temperature(45_123), "45.1 °C");
        assert_eq!(format_temperature(0), "0.0 °C");
        assert_eq!(format_temperature(125_000), "125.0 °C");
    }

    #[test]
    fn test_format_zones() {
        assert_eq!(format_zones(&[]), "No zones registered\n");

        let zones = vec![ZoneInfo {
            id: 1,
            name: "gpu".into(),
            variant: "samsung,exynos8895-tmu".into(),
            channels: vec![0, 1, 2],
            aggregation: "avg".into(),
            passive: true,
            cooling: "gpufreq".into(),
        }];
        let text = format_zones(&zones);
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("0,1,2"));
        assert!(text.contains("polled"));
    }

    #[test]
    fn test_format_state_optional_lines() {
        let mut state = DeviceStatus {
            id: 0,
            name: "cpu".into(),
            variant: "samsung,exynos8890-tmu".into(),
            stage: "enabled".into(),
            enabled: true,
            suspended: false,
            passive: false,
            cooling: "cpufreq".into(),
            emulation_mc: None,
            hotplug_parked: None,
            last_temperature_mc: Some(41_000),
            interrupts: InterruptCounters { fired: 3, coalesced: 1, handled: 2 },
        };
        let text = format_state(&state);
        assert!(text.contains("temperature: 41.0 °C"));
        assert!(!text.contains("emulation"));
        assert!(!text.contains("hotplug"));

        state.hotplug_parked = Some(true);
        state.emulation_mc = Some(80_000);
        let text = format_state(&state);
        assert!(text.contains("hotplug:     parked"));
        assert!(text.contains("emulation:   80.0 °C"));
        assert!(text.contains("3 fired, 1 coalesced, 2 handled"));
    }
}
