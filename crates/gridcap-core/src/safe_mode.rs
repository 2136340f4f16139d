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

//! Conservative fallback policy used after sustained control violation

use crate::config::{ControlConfig, SafeModeConfig};
use std::time::Duration;
use tracing::{info, warn};

/// Minimum actuator difference (W) worth re-applying
const MIN_APPLY_DELTA_W: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct SafeModeSupervisor {
    config: SafeModeConfig,
    active: bool,
    reason: Option<String>,
    clear_accum_s: f64,
}

impl SafeModeSupervisor {
    pub fn new(config: SafeModeConfig) -> Self {
        Self {
            config,
            active: false,
            reason: None,
            clear_accum_s: 0.0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn clear_accum_s(&self) -> f64 {
        self.clear_accum_s
    }

    pub fn apply_period(&self) -> Duration {
        Duration::from_secs_f64(self.config.apply_period_s)
    }

    pub fn enter(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("🛡️ [SAFE] ENTER: {}", reason);
        self.active = true;
        self.reason = Some(reason);
        self.clear_accum_s = 0.0;
    }

    /// Leave SAFE without the exit condition (e.g. going OFFLINE)
    pub fn clear(&mut self) {
        self.active = false;
        self.reason = None;
        self.clear_accum_s = 0.0;
    }

    /// Feed one fresh meter error; returns `true` when SAFE mode was left
    ///
    /// Samples inside the deadband add `dt` to the exit accumulator, any
    /// other sample resets it.
    pub fn observe_sample(&mut self, error_w: f64, deadband_w: f64, dt: Duration) -> bool {
        if !self.active {
            return false;
        }

        if error_w.abs() <= deadband_w {
            self.clear_accum_s += dt.as_secs_f64();
        } else {
            self.clear_accum_s = 0.0;
        }

        if self.clear_accum_s >= self.config.exit_deadband_time_s {
            info!(
                "✅ [SAFE] EXIT: error within deadband for {:.1}s",
                self.clear_accum_s
            );
            self.clear();
            return true;
        }
        false
    }

    /// Conservative limit: target plus margin, or the minimum for a negative target
    pub fn safe_limit(&self, control: &ControlConfig) -> i64 {
        let min = control.export_limit_min_w;
        let max = control.export_limit_max_w;
        let limit = if control.target_meter_w >= 0.0 {
            control.target_meter_w + self.config.export_margin_w
        } else {
            min
        };
        limit.clamp(min, max).round().clamp(min.ceil(), max.floor()) as i64
    }

    /// Whether the actuator is far enough from `safe_limit_w` to need a write
    pub fn needs_apply(current_limit_w: f64, safe_limit_w: i64) -> bool {
        (current_limit_w - safe_limit_w as f64).abs() >= MIN_APPLY_DELTA_W
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: Duration = Duration::from_millis(250);

    fn active() -> SafeModeSupervisor {
        let mut safe = SafeModeSupervisor::new(SafeModeConfig::default());
        safe.enter("persistent violation");
        safe
    }

    #[test]
    fn test_safe_limit_positive_target() {
        let safe = SafeModeSupervisor::new(SafeModeConfig {
            export_margin_w: 500.0,
            ..SafeModeConfig::default()
        });
        let control = ControlConfig {
            target_meter_w: 25_000.0,
            ..ControlConfig::default()
        };
        assert_eq!(safe.safe_limit(&control), 25_500);
    }

    #[test]
    fn test_safe_limit_negative_target_is_min() {
        let safe = SafeModeSupervisor::new(SafeModeConfig::default());
        let control = ControlConfig {
            target_meter_w: -15_000.0,
            export_limit_min_w: 1_000.0,
            ..ControlConfig::default()
        };
        assert_eq!(safe.safe_limit(&control), 1_000);
    }

    #[test]
    fn test_safe_limit_clamped() {
        let safe = SafeModeSupervisor::new(SafeModeConfig::default());
        let control = ControlConfig {
            target_meter_w: 500_000.0,
            ..ControlConfig::default()
        };
        assert_eq!(safe.safe_limit(&control), 200_000);
    }

    #[test]
    fn test_exit_after_continuous_deadband() {
        let mut safe = active();
        // 10 s of 0.25 s samples
        for _ in 0..39 {
            assert!(!safe.observe_sample(50.0, 200.0, SAMPLE));
        }
        assert!(safe.observe_sample(-50.0, 200.0, SAMPLE));
        assert!(!safe.is_active());
        assert!(safe.reason().is_none());
    }

    #[test]
    fn test_sample_outside_deadband_restarts_exit_timer() {
        let mut safe = active();
        for _ in 0..30 {
            safe.observe_sample(0.0, 200.0, SAMPLE);
        }
        assert!(!safe.observe_sample(5_000.0, 200.0, SAMPLE));
        assert_eq!(safe.clear_accum_s(), 0.0);
        assert!(safe.is_active());
    }

    #[test]
    fn test_inactive_ignores_samples() {
        let mut safe = SafeModeSupervisor::new(SafeModeConfig::default());
        for _ in 0..100 {
            assert!(!safe.observe_sample(0.0, 200.0, SAMPLE));
        }
        assert_eq!(safe.clear_accum_s(), 0.0);
    }

    #[test]
    fn test_needs_apply() {
        assert!(!SafeModeSupervisor::needs_apply(25_000.0, 25_000));
        assert!(!SafeModeSupervisor::needs_apply(25_000.4, 25_000));
        assert!(SafeModeSupervisor::needs_apply(10_000.0, 25_000));
    }
}
