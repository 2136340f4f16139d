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

//! Export-limit control law
//!
//! Each write cycle turns the meter error into a ramped, clamped setpoint for
//! the export limit. The controller does no I/O: it returns a
//! [`ControlDecision`] and the driver performs the write.
//!
//! Sign convention: positive power is export. A positive error (exporting
//! more than the target) lowers the limit.

use crate::config::{ControlConfig, OocAlarmConfig};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Distance (W) within which the limit counts as sitting on a bound
const BOUND_TOLERANCE_W: f64 = 0.5;

/// Smallest setpoint change worth a write (W)
const MIN_WRITE_DELTA_W: f64 = 1.0;

/// Outcome of one write cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlDecision {
    /// Negative target while the limit is already at minimum; the limit cannot
    /// force an import, so the cycle only watches for uncontrolled export
    OutOfControlWatch { alarm: bool },

    /// The limit is on the bound the error pushes toward
    Saturated { at_max: bool },

    /// Error within the deadband
    Deadband,

    /// Violation lasted long enough to leave normal control
    SustainedViolation { error_w: f64 },

    /// Desired setpoint equals the last written one
    Unchanged { desired_w: i64 },

    /// Write a new setpoint
    Write { from_w: f64, to_w: i64 },

    /// Meter or limit reading is not a finite number
    InvalidInput,
}

#[derive(Debug, Clone)]
pub struct Controller {
    control: ControlConfig,
    ooc: OocAlarmConfig,
    violation_accum_s: f64,
    ooc_accum_s: f64,
    ooc_alarm: bool,
    last_written_w: Option<i64>,
}

impl Controller {
    pub fn new(control: ControlConfig, ooc: OocAlarmConfig) -> Self {
        Self {
            control,
            ooc,
            violation_accum_s: 0.0,
            ooc_accum_s: 0.0,
            ooc_alarm: false,
            last_written_w: None,
        }
    }

    /// `meter - target`; positive means exporting more than wanted
    pub fn error_w(&self, meter_w: f64) -> f64 {
        meter_w - self.control.target_meter_w
    }

    fn at_min(&self, limit_w: f64) -> bool {
        limit_w <= self.control.export_limit_min_w + BOUND_TOLERANCE_W
    }

    fn at_max(&self, limit_w: f64) -> bool {
        limit_w >= self.control.export_limit_max_w - BOUND_TOLERANCE_W
    }

    /// Run one write cycle
    ///
    /// `current_limit_w` is the limit from the appliance configuration and
    /// `dt` the nominal cycle time added to the accumulators.
    pub fn decide(&mut self, meter_w: f64, current_limit_w: f64, dt: Duration) -> ControlDecision {
        if !meter_w.is_finite() || !current_limit_w.is_finite() {
            warn!(
                "⚠️ [CTRL] Ignoring non-finite input: meter={} limit={}",
                meter_w, current_limit_w
            );
            return ControlDecision::InvalidInput;
        }

        let target_w = self.control.target_meter_w;
        let error_w = self.error_w(meter_w);
        let dt_s = dt.as_secs_f64();

        // Negative target with the limit at minimum. Checked before saturation:
        // the saturation rule would otherwise swallow exactly the export this
        // path has to detect.
        if target_w < 0.0 && self.at_min(current_limit_w) {
            self.violation_accum_s = 0.0;

            if self.ooc.enabled && meter_w > self.ooc.export_threshold_w {
                self.ooc_accum_s += dt_s;
            } else {
                self.ooc_accum_s = 0.0;
            }

            if self.ooc.enabled && !self.ooc_alarm && self.ooc_accum_s >= self.ooc.time_s {
                self.ooc_alarm = true;
                error!(
                    "🚨 [ALARM] OUT-OF-CONTROL: exporting {:.0}W with export limit at {:.0}W for {:.1}s",
                    meter_w, current_limit_w, self.ooc_accum_s
                );
            }

            debug!(
                "🔍 [CTRL] ooc_alarm={} target={:.0}W limit={:.0}W meter={:.0}W -> watching",
                self.ooc_alarm, target_w, current_limit_w, meter_w
            );
            return ControlDecision::OutOfControlWatch {
                alarm: self.ooc_alarm,
            };
        }
        self.ooc_accum_s = 0.0;

        let at_max = self.at_max(current_limit_w);
        if (error_w < 0.0 && at_max) || (error_w > 0.0 && self.at_min(current_limit_w)) {
            self.violation_accum_s = 0.0;
            debug!(
                "🔍 [SAT] limit={:.0}W meter={:.0}W err={:.0}W -> saturated",
                current_limit_w, meter_w, error_w
            );
            return ControlDecision::Saturated { at_max };
        }

        if error_w.abs() <= self.control.deadband_w {
            self.violation_accum_s = 0.0;
            debug!(
                "🔍 [CTRL] meter={:.0}W target={:.0}W err={:.0}W (deadband)",
                meter_w, target_w, error_w
            );
            return ControlDecision::Deadband;
        }

        if error_w.abs() >= self.control.violation_limit_w {
            self.violation_accum_s += dt_s;
        } else {
            self.violation_accum_s = 0.0;
        }

        if self.violation_accum_s >= self.control.violation_time_s {
            warn!(
                "⚠️ [CTRL] Persistent violation: err={:.0}W for {:.1}s",
                error_w, self.violation_accum_s
            );
            self.violation_accum_s = 0.0;
            return ControlDecision::SustainedViolation { error_w };
        }

        let desired_w = self.next_setpoint(error_w, current_limit_w);

        if let Some(last) = self.last_written_w
            && (desired_w - last).abs() < MIN_WRITE_DELTA_W as i64
        {
            debug!(
                "🔍 [CTRL] meter={:.0}W err={:.0}W -> limit ~{}W (skip)",
                meter_w, error_w, desired_w
            );
            return ControlDecision::Unchanged { desired_w };
        }

        ControlDecision::Write {
            from_w: current_limit_w,
            to_w: desired_w,
        }
    }

    /// Ramp-limited, clamped setpoint in whole watts
    pub fn next_setpoint(&self, error_w: f64, current_limit_w: f64) -> i64 {
        let ramp = self.control.ramp_w_per_step;
        let min = self.control.export_limit_min_w;
        let max = self.control.export_limit_max_w;

        let step = error_w.clamp(-ramp, ramp);
        let desired = (current_limit_w - step).clamp(min, max);
        desired.round().clamp(min.ceil(), max.floor()) as i64
    }

    /// Remember a setpoint the appliance accepted
    pub fn record_write(&mut self, limit_w: i64) {
        self.last_written_w = Some(limit_w);
    }

    /// Clear the accumulators after a mode change; the OOC alarm stays latched
    pub fn reset(&mut self) {
        self.violation_accum_s = 0.0;
        self.ooc_accum_s = 0.0;
        self.last_written_w = None;
    }

    pub fn violation_accum_s(&self) -> f64 {
        self.violation_accum_s
    }

    pub fn ooc_accum_s(&self) -> f64 {
        self.ooc_accum_s
    }

    pub fn ooc_alarm(&self) -> bool {
        self.ooc_alarm
    }

    pub fn last_written_w(&self) -> Option<i64> {
        self.last_written_w
    }

    pub fn target_w(&self) -> f64 {
        self.control.target_meter_w
    }
}
