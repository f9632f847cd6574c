//! Battery report.

use serde::Serialize;
use tabled::Tabled;

use thingsync_core::RegistrySync;

use crate::cli::{BatteryArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct BatteryEntry {
    name: String,
    level: Option<f64>,
    low: bool,
}

#[derive(Tabled)]
struct BatteryRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Status")]
    status: &'static str,
}

fn row(e: &BatteryEntry) -> BatteryRow {
    BatteryRow {
        name: e.name.clone(),
        level: e.level.map_or_else(|| "-".into(), |l| format!("{l:.0}%")),
        status: match (e.level, e.low) {
            (None, _) => "unknown",
            (Some(_), true) => "LOW",
            (Some(_), false) => "ok",
        },
    }
}

fn entries(registry: &RegistrySync, threshold: f64, all: bool) -> Vec<BatteryEntry> {
    if !all {
        return registry
            .low_battery(threshold)
            .into_iter()
            .map(|r| BatteryEntry {
                name: r.name,
                level: Some(r.level),
                low: true,
            })
            .collect();
    }
    registry
        .battery_powered()
        .into_iter()
        .map(|name| {
            let level = registry.device(&name).and_then(|d| d.battery_level());
            BatteryEntry {
                low: level.is_some_and(|l| l < threshold),
                name,
                level,
            }
        })
        .collect()
}

pub fn handle(registry: &RegistrySync, args: &BatteryArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let threshold = args
        .threshold
        .unwrap_or(registry.config().low_battery_threshold);
    if !(0.0..=100.0).contains(&threshold) {
        return Err(CliError::Validation {
            field: "threshold".into(),
            reason: format!("expected a percentage between 0 and 100, got {threshold}"),
        });
    }

    let entries = entries(registry, threshold, args.all);
    let out = output::render_list(&global.output, &entries, row, |e| e.name.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_flag_low_and_unknown_levels() {
        let low = row(&BatteryEntry {
            name: "Door".into(),
            level: Some(12.0),
            low: true,
        });
        assert_eq!(low.level, "12%");
        assert_eq!(low.status, "LOW");

        let unknown = row(&BatteryEntry {
            name: "Window".into(),
            level: None,
            low: false,
        });
        assert_eq!(unknown.level, "-");
        assert_eq!(unknown.status, "unknown");
    }
}
