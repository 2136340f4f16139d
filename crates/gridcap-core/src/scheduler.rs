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

//! Named periodic deadlines advanced by the driver tick

use crate::config::ControllerConfig;
use std::time::{Duration, Instant};
use tracing::debug;

/// A timer this many periods behind is resynchronised instead of catching up
pub const LAG_RESYNC_PERIODS: u32 = 3;

/// Fixed-period deadline that rearms by addition
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    name: &'static str,
    period: Duration,
    next: Instant,
}

impl PeriodicTimer {
    pub fn new(name: &'static str, period: Duration, first_due: Instant) -> Self {
        Self {
            name,
            period,
            next: first_due,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_due(&self) -> Instant {
        self.next
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    /// Fire if due and rearm one period later
    ///
    /// The next deadline is `previous + period` so the cadence does not drift
    /// with loop latency. A timer that fell more than [`LAG_RESYNC_PERIODS`]
    /// behind (e.g. after a long blocking call) is moved to `now + period`
    /// rather than firing repeatedly to catch up.
    pub fn fire(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }

        let lag = now.duration_since(self.next);
        if lag > self.period * LAG_RESYNC_PERIODS {
            debug!(
                "⏱️ [TIMER] {} lagging by {:?}, resynchronising",
                self.name, lag
            );
            self.next = now + self.period;
        } else {
            self.next += self.period;
        }
        true
    }

    /// Next deadline one period from `now`
    pub fn rearm_from(&mut self, now: Instant) {
        self.next = now + self.period;
    }

    /// Make the timer due at `at`
    pub fn reset(&mut self, at: Instant) {
        self.next = at;
    }
}

/// All deadlines of the control loop
#[derive(Debug, Clone)]
pub struct Timers {
    pub data: PeriodicTimer,
    pub status: PeriodicTimer,
    pub write: PeriodicTimer,
    pub safe_apply: PeriodicTimer,
    pub offline_retry: PeriodicTimer,
    pub token_age: Option<PeriodicTimer>,
}

impl Timers {
    /// Polling and writing due immediately
    pub fn new(config: &ControllerConfig, now: Instant) -> Self {
        let timing = &config.timing;
        let token_age = (config.supervisor.token_age_log_period_s > 0.0).then(|| {
            let period = Duration::from_secs_f64(config.supervisor.token_age_log_period_s);
            PeriodicTimer::new("token-age", period, now + period)
        });
        let offline_period = Duration::from_secs_f64(config.supervisor.offline_retry_s);

        Self {
            data: PeriodicTimer::new("data", timing.read_data_period(), now),
            status: PeriodicTimer::new("status", timing.read_status_period(), now),
            write: PeriodicTimer::new("write", timing.write_period(), now),
            safe_apply: PeriodicTimer::new(
                "safe-apply",
                Duration::from_secs_f64(config.safe_mode.apply_period_s),
                now,
            ),
            offline_retry: PeriodicTimer::new("offline-retry", offline_period, now),
            token_age,
        }
    }

    /// Restart polling and writing at `now` (after leaving OFFLINE)
    pub fn restart_polling(&mut self, now: Instant) {
        self.data.reset(now);
        self.status.reset(now);
        self.write.reset(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(250);

    #[test]
    fn test_fires_when_due_and_rearms_by_addition() {
        let start = Instant::now();
        let mut timer = PeriodicTimer::new("data", PERIOD, start);

        assert!(timer.fire(start + Duration::from_millis(10)));
        // rearmed relative to the previous deadline, not to `now`
        assert_eq!(timer.next_due(), start + PERIOD);
        assert!(!timer.fire(start + Duration::from_millis(200)));
        assert!(timer.fire(start + Duration::from_millis(260)));
        assert_eq!(timer.next_due(), start + PERIOD * 2);
    }

    #[test]
    fn test_small_lag_catches_up() {
        let start = Instant::now();
        let mut timer = PeriodicTimer::new("data", PERIOD, start);

        let now = start + Duration::from_millis(600);
        assert!(timer.fire(now));
        assert_eq!(timer.next_due(), start + PERIOD);
        assert!(timer.fire(now));
        assert_eq!(timer.next_due(), start + PERIOD * 2);
    }

    #[test]
    fn test_large_lag_resynchronises() {
        let start = Instant::now();
        let mut timer = PeriodicTimer::new("data", PERIOD, start);

        let now = start + Duration::from_secs(5);
        assert!(timer.fire(now));
        assert_eq!(timer.next_due(), now + PERIOD);
        assert!(!timer.fire(now));
    }

    #[test]
    fn test_rearm_from_now() {
        let start = Instant::now();
        let mut timer = PeriodicTimer::new("offline-retry", Duration::from_secs(30), start);
        let now = start + Duration::from_secs(3);
        timer.rearm_from(now);
        assert_eq!(timer.next_due(), now + Duration::from_secs(30));
        assert!(!timer.is_due(now + Duration::from_secs(29)));
        assert!(timer.is_due(now + Duration::from_secs(30)));
    }

    #[test]
    fn test_timers_start_due() {
        let config = ControllerConfig::default();
        let now = Instant::now();
        let timers = Timers::new(&config, now);
        assert!(timers.data.is_due(now));
        assert!(timers.status.is_due(now));
        assert!(timers.write.is_due(now));
        let token_age = timers.token_age.expect("token age timer enabled by default");
        assert!(!token_age.is_due(now));
    }

    #[test]
    fn test_token_age_timer_disabled() {
        let mut config = ControllerConfig::default();
        config.supervisor.token_age_log_period_s = 0.0;
        let timers = Timers::new(&config, Instant::now());
        assert!(timers.token_age.is_none());
    }
}
