// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridCap.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Data exchanged with the appliance

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration section holding the export limit
pub const POWER_LIMIT_SECTION: &str = "POWER_LIMIT_CONTROL";
pub const POWER_LIMIT_ENABLE_KEY: &str = "PowerLimit_Enable";
pub const GRID_EXPORT_LIMIT_KEY: &str = "GridExportLimit";

/// Meter reading normalised to the controller's sign convention
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeterSample {
    /// Positive = export to the grid, negative = import from the grid
    pub signed_power_w: f64,
}

impl MeterSample {
    /// Apply the configured sign convention to a raw `meterPower` value
    pub fn from_raw(raw_meter_w: f64, positive_is_export: bool) -> Self {
        let signed_power_w = if positive_is_export {
            raw_meter_w
        } else {
            -raw_meter_w
        };
        Self { signed_power_w }
    }
}

/// Fast telemetry (`/sems/overview/data`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Raw meter power as reported by the appliance
    pub meter_power_w: f64,
    pub load_power_w: Option<f64>,
    pub inverter_power_w: Option<f64>,
    pub pv_power_w: Option<f64>,
    pub battery_power_w: Option<f64>,
}

/// Slow device status (`/sems/overview/status`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub error1: Vec<i64>,
    pub error3: Vec<i64>,
}

impl StatusSnapshot {
    /// Whether any alarm bit is set in either bit-field
    pub fn has_alarm(&self) -> bool {
        self.error1.iter().chain(self.error3.iter()).any(|word| *word != 0)
    }
}

/// The export-limit sub-object of the device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportLimitControl {
    pub enabled: bool,
    pub limit_w: i64,
}

/// Full device configuration object
///
/// Only the `POWER_LIMIT_CONTROL` section is interpreted; every other key is
/// carried through a read-modify-write untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSnapshot(Map<String, Value>);

impl ConfigSnapshot {
    pub fn new(object: Map<String, Value>) -> Self {
        Self(object)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Current export-limit settings; a missing section reads as disabled with limit 0
    pub fn export_limit(&self) -> ExportLimitControl {
        let section = self.0.get(POWER_LIMIT_SECTION).and_then(Value::as_object);
        let enabled = section
            .and_then(|s| s.get(POWER_LIMIT_ENABLE_KEY))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let limit_w = section
            .and_then(|s| s.get(GRID_EXPORT_LIMIT_KEY))
            .and_then(lenient_f64)
            .map_or(0, |w| w.round() as i64);

        ExportLimitControl { enabled, limit_w }
    }

    /// Copy of this snapshot with the export limit enabled and set to `limit_w`
    pub fn with_export_limit(&self, limit_w: i64) -> Self {
        let mut object = self.0.clone();
        let section = object
            .entry(POWER_LIMIT_SECTION)
            .or_insert_with(|| Value::Object(Map::new()));
        if !section.is_object() {
            *section = Value::Object(Map::new());
        }
        if let Value::Object(section) = section {
            section.insert(POWER_LIMIT_ENABLE_KEY.to_owned(), Value::Bool(true));
            section.insert(GRID_EXPORT_LIMIT_KEY.to_owned(), Value::from(limit_w));
        }
        Self(object)
    }
}

/// Read a number that the appliance may encode either as JSON number or numeric string
///
/// Non-finite values ("NaN", "inf") are rejected.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> ConfigSnapshot {
        match value {
            Value::Object(map) => ConfigSnapshot::new(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_meter_sign_convention() {
        assert_eq!(MeterSample::from_raw(1500.0, true).signed_power_w, 1500.0);
        assert_eq!(MeterSample::from_raw(1500.0, false).signed_power_w, -1500.0);
    }

    #[test]
    fn test_lenient_f64_rejects_non_finite() {
        assert_eq!(lenient_f64(&json!("1200.5")), Some(1200.5));
        assert_eq!(lenient_f64(&json!(-300)), Some(-300.0));
        for raw in ["NaN", "nan", "inf", "-inf", "infinity"] {
            assert_eq!(lenient_f64(&json!(raw)), None, "{raw}");
        }
        assert_eq!(lenient_f64(&json!(null)), None);
    }

    #[test]
    fn test_status_alarm_bits() {
        let clear = StatusSnapshot {
            error1: vec![0, 0],
            error3: vec![0],
        };
        assert!(!clear.has_alarm());

        let alarm = StatusSnapshot {
            error1: vec![0],
            error3: vec![0, 4],
        };
        assert!(alarm.has_alarm());
    }

    #[test]
    fn test_export_limit_read() {
        let cfg = snapshot(json!({
            "POWER_LIMIT_CONTROL": {"PowerLimit_Enable": true, "GridExportLimit": 74000}
        }));
        assert_eq!(
            cfg.export_limit(),
            ExportLimitControl {
                enabled: true,
                limit_w: 74000
            }
        );
    }

    #[test]
    fn test_export_limit_missing_section() {
        let cfg = snapshot(json!({"GRID": {"voltage": 230}}));
        assert_eq!(
            cfg.export_limit(),
            ExportLimitControl {
                enabled: false,
                limit_w: 0
            }
        );
    }

    #[test]
    fn test_export_limit_string_value() {
        let cfg = snapshot(json!({"POWER_LIMIT_CONTROL": {"GridExportLimit": "1200"}}));
        assert_eq!(cfg.export_limit().limit_w, 1200);
    }

    #[test]
    fn test_with_export_limit_keeps_unrelated_fields() {
        let cfg = snapshot(json!({
            "POWER_LIMIT_CONTROL": {
                "PowerLimit_Enable": false,
                "GridExportLimit": 1000,
                "PowerLimit_Mode": 2
            },
            "BATTERY": {"soc_min": 10, "soc_max": 95},
            "name": "site-a"
        }));

        let updated = cfg.with_export_limit(20_000);
        assert_eq!(
            serde_json::to_value(&updated).unwrap(),
            json!({
                "POWER_LIMIT_CONTROL": {
                    "PowerLimit_Enable": true,
                    "GridExportLimit": 20000,
                    "PowerLimit_Mode": 2
                },
                "BATTERY": {"soc_min": 10, "soc_max": 95},
                "name": "site-a"
            })
        );
        // the original snapshot is untouched
        assert_eq!(cfg.export_limit().limit_w, 1000);
    }

    #[test]
    fn test_with_export_limit_creates_section() {
        let cfg = snapshot(json!({"POWER_LIMIT_CONTROL": null}));
        let updated = cfg.with_export_limit(0);
        assert_eq!(
            updated.export_limit(),
            ExportLimitControl {
                enabled: true,
                limit_w: 0
            }
        );
    }
}
