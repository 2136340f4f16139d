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

//! Cooperative control loop
//!
//! [`Driver::tick`] advances every timer against a given instant and performs
//! at most one data read, one status read and one control decision. It never
//! sleeps, so the whole loop can be stepped deterministically with a
//! [`ManualClock`](crate::clock::ManualClock). [`Driver::run`] wraps it with
//! the idle sleep and the stop flag.
//!
//! Order inside a tick:
//! 1. OFFLINE: only the backoff login retry runs
//! 2. token-age report
//! 3. fast telemetry (also feeds the SAFE exit timer)
//! 4. slow telemetry
//! 5. SAFE: periodic re-apply of the conservative limit, nothing else
//! 6. NORMAL: control decision and setpoint write

use crate::api::{ApplianceApi, Credentials};
use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::controller::ControlDecision;
use crate::error::ApiError;
use crate::safe_mode::SafeModeSupervisor;
use crate::state::{ControlState, ControllerState};
use crate::types::ExportLimitControl;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// At least one timer fired
    pub did_work: bool,
    pub mode: ControlState,
}

pub struct Driver<A, C> {
    config: ControllerConfig,
    api: A,
    clock: C,
    state: ControllerState,
    stop: Arc<AtomicBool>,
}

impl<A: std::fmt::Debug, C: std::fmt::Debug> std::fmt::Debug for Driver<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("api", &self.api)
            .field("clock", &self.clock)
            .field("mode", &self.state.mode)
            .field("stop", &self.stop.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<A: ApplianceApi, C: Clock> Driver<A, C> {
    pub fn new(config: ControllerConfig, credentials: Credentials, api: A, clock: C) -> Self {
        let state = ControllerState::new(&config, credentials, clock.now());
        Self {
            config,
            api,
            clock,
            state,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned stop flag (set from a signal handler)
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn mode(&self) -> ControlState {
        self.state.mode
    }

    pub fn ooc_alarm(&self) -> bool {
        self.state.controller.ooc_alarm()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Tick until the stop flag is raised, sleeping when nothing was due
    pub fn run(&mut self) {
        info!(
            "🚀 Control loop started: target={:.0}W limit=[{:.0}, {:.0}]W appliance={}",
            self.config.control.target_meter_w,
            self.config.control.export_limit_min_w,
            self.config.control.export_limit_max_w,
            self.config.appliance.base_url
        );

        let idle = self.config.timing.idle_sleep();
        while !self.stop.load(Ordering::Relaxed) {
            let outcome = self.tick(self.clock.now());
            if !outcome.did_work {
                self.clock.sleep(idle);
            }
        }

        info!("🛑 Stop requested, leaving control loop in {}", self.state.mode);
    }

    /// Best-effort logout; never fails
    pub fn shutdown(&mut self) {
        if self.config.supervisor.graceful_logout {
            self.state.session.logout(&mut self.api);
        } else {
            debug!("Graceful logout disabled");
        }
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let did_work = self.step(now);
        TickOutcome {
            did_work,
            mode: self.state.mode,
        }
    }

    fn step(&mut self, now: Instant) -> bool {
        if self.state.mode == ControlState::Offline {
            return self.offline_retry(now);
        }

        self.report_token_age(now);

        let mut did_work = false;

        if self.state.timers.data.fire(now) {
            did_work = true;
            if !self.poll_data(now) {
                return true;
            }
        }

        if self.state.timers.status.fire(now) {
            did_work = true;
            if !self.poll_status(now) {
                return true;
            }
        }

        if self.state.mode == ControlState::Safe {
            if self.state.timers.safe_apply.fire(now) {
                did_work = true;
                self.apply_safe_limit(now);
            }
            return did_work;
        }

        if self.state.timers.write.fire(now) {
            did_work = true;
            self.control_cycle(now);
        }

        did_work
    }

    /// Token for the next call; logs in when none is held
    ///
    /// A failed login takes the loop OFFLINE.
    fn acquire_token(&mut self, now: Instant) -> Option<String> {
        let had_token = self.state.session.has_token();
        match self.state.session.ensure_valid(&mut self.api, now) {
            Ok(()) => {
                if !had_token {
                    self.state.fault.record_success();
                }
                self.state.session.token().map(str::to_owned)
            }
            Err(e) => {
                self.state.fault.record_failure("AUTH", &e);
                self.go_offline(format!("login failed: {e}"), now);
                None
            }
        }
    }

    /// Account for a failed operation; returns `true` if the loop went OFFLINE
    fn handle_failure(&mut self, operation: &str, err: &ApiError, now: Instant) -> bool {
        if err.is_invalid_token() {
            self.state.session.invalidate();
        }
        if self.state.fault.record_failure(operation, err) {
            let reason = format!(
                "{} consecutive communication failures",
                self.state.fault.comm_fails()
            );
            self.go_offline(reason, now);
            return true;
        }
        false
    }

    fn go_offline(&mut self, reason: String, now: Instant) {
        self.state.fault.enter_offline(reason, now);
        self.state.safe.clear();
        self.state.session.invalidate();
        self.state.timers.offline_retry.rearm_from(now);
        self.state.mode = ControlState::Offline;
    }

    fn offline_retry(&mut self, now: Instant) -> bool {
        if !self.state.timers.offline_retry.fire(now) {
            return false;
        }

        info!("📴 [OFFLINE] Attempting login");
        match self.state.session.login(&mut self.api, now) {
            Ok(()) => {
                self.state.fault.exit_offline(now);
                self.state.config_store.invalidate();
                self.state.controller.reset();
                self.state.safe.clear();
                self.state.timers.restart_polling(now);
                self.state.mode = ControlState::Normal;
                info!("✅ [STATE] OFFLINE -> NORMAL");
            }
            Err(e) => {
                warn!(
                    "📴 [OFFLINE] Still offline: {}; next attempt in {:.0}s",
                    e,
                    self.state.timers.offline_retry.period().as_secs_f64()
                );
            }
        }
        true
    }

    fn report_token_age(&mut self, now: Instant) {
        let Some(timer) = self.state.timers.token_age.as_mut() else {
            return;
        };
        if timer.fire(now)
            && let Some(age) = self.state.session.token_age(now)
        {
            info!("🔑 [AUTH] Token age {:.0}s", age.as_secs_f64());
        }
    }

    /// Fast read; returns `false` if the loop went OFFLINE
    fn poll_data(&mut self, now: Instant) -> bool {
        let Some(token) = self.acquire_token(now) else {
            return false;
        };

        match self.state.telemetry.read_fast(&mut self.api, &token) {
            Ok(sample) => {
                self.state.fault.record_success();
                if self.state.mode == ControlState::Safe {
                    let error_w = self.state.controller.error_w(sample.signed_power_w);
                    let exited = self.state.safe.observe_sample(
                        error_w,
                        self.config.control.deadband_w,
                        self.config.timing.read_data_period(),
                    );
                    if exited {
                        self.state.mode = ControlState::Normal;
                        self.state.controller.reset();
                        self.state.timers.write.reset(now);
                        info!("✅ [STATE] SAFE -> NORMAL");
                    }
                }
                true
            }
            Err(e) => !self.handle_failure("DATA", &e, now),
        }
    }

    /// Slow read; returns `false` if the loop went OFFLINE
    fn poll_status(&mut self, now: Instant) -> bool {
        let Some(token) = self.acquire_token(now) else {
            return false;
        };

        match self.state.telemetry.read_slow(&mut self.api, &token) {
            Ok(_) => {
                self.state.fault.record_success();
                true
            }
            Err(e) => !self.handle_failure("STATUS", &e, now),
        }
    }

    /// Export-limit section from the cached configuration, fetched when stale
    fn current_limit(
        &mut self,
        token: &str,
        now: Instant,
        operation: &str,
    ) -> Option<ExportLimitControl> {
        let fetching = self.state.config_store.is_stale(now);
        match self
            .state
            .config_store
            .export_limit(&mut self.api, token, now)
        {
            Ok(current) => {
                if fetching {
                    self.state.fault.record_success();
                }
                Some(current)
            }
            Err(e) => {
                self.handle_failure(operation, &e, now);
                None
            }
        }
    }

    fn control_cycle(&mut self, now: Instant) {
        let Some(sample) = self.state.telemetry.latest_sample() else {
            debug!("🔍 [CTRL] No meter sample yet");
            return;
        };
        let Some(token) = self.acquire_token(now) else {
            return;
        };

        let Some(current) = self.current_limit(&token, now, "CONFIG") else {
            return;
        };

        let decision = self.state.controller.decide(
            sample.signed_power_w,
            current.limit_w as f64,
            self.config.timing.write_period(),
        );

        match decision {
            ControlDecision::Write { from_w, to_w } if self.state.mode.allows_writes() => {
                match self
                    .state
                    .config_store
                    .write_export_limit(&mut self.api, &token, now, to_w)
                {
                    Ok(()) => {
                        self.state.fault.record_success();
                        self.state.controller.record_write(to_w);
                        info!(
                            "✍️ [WRITE] meter={:.0}W err={:.0}W limit {:.0}W -> {}W",
                            sample.signed_power_w,
                            self.state.controller.error_w(sample.signed_power_w),
                            from_w,
                            to_w
                        );
                    }
                    Err(e) => {
                        self.handle_failure("WRITE", &e, now);
                    }
                }
            }
            ControlDecision::SustainedViolation { error_w } => {
                let reason = format!(
                    "|err|={:.0}W >= {:.0}W for {:.1}s",
                    error_w.abs(),
                    self.config.control.violation_limit_w,
                    self.config.control.violation_time_s
                );
                if self.state.safe.enabled() {
                    self.state.safe.enter(reason);
                    self.state.mode = ControlState::Safe;
                    info!("🛡️ [STATE] NORMAL -> SAFE");
                    self.state.timers.safe_apply.rearm_from(now);
                    self.apply_safe_limit(now);
                } else {
                    error!("🛑 [FAULT] Persistent violation with safe mode disabled: {}", reason);
                    self.go_offline(format!("persistent violation: {reason}"), now);
                }
            }
            ControlDecision::Write { to_w, .. } => {
                debug!("🔍 [CTRL] Mode {} blocks write of {}W", self.state.mode, to_w);
            }
            ControlDecision::OutOfControlWatch { .. }
            | ControlDecision::Saturated { .. }
            | ControlDecision::Deadband
            | ControlDecision::Unchanged { .. }
            | ControlDecision::InvalidInput => {}
        }
    }

    /// Write the conservative limit if the actuator is not already there
    fn apply_safe_limit(&mut self, now: Instant) {
        if !self.state.mode.allows_writes() {
            debug!("🛡️ [SAFE] Mode {} blocks writes", self.state.mode);
            return;
        }
        let Some(token) = self.acquire_token(now) else {
            return;
        };

        let Some(current) = self.current_limit(&token, now, "SAFE") else {
            return;
        };

        let safe_limit_w = self.state.safe.safe_limit(&self.config.control);
        if !SafeModeSupervisor::needs_apply(current.limit_w as f64, safe_limit_w) {
            debug!("🛡️ [SAFE] Limit already at {}W", safe_limit_w);
            return;
        }

        match self
            .state
            .config_store
            .write_export_limit(&mut self.api, &token, now, safe_limit_w)
        {
            Ok(()) => {
                self.state.fault.record_success();
                info!(
                    "🛡️ [SAFE] Applied limit {}W (was {}W)",
                    safe_limit_w, current.limit_w
                );
            }
            Err(e) => {
                self.handle_failure("SAFE", &e, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{FakeAppliance, Operation};
    use std::time::Duration;

    fn driver(limit_w: i64) -> Driver<FakeAppliance, ManualClock> {
        let mut config = ControllerConfig::default();
        config.appliance.password = Some("secret".to_string());
        Driver::new(
            config,
            Credentials::from_password("admin", "secret"),
            FakeAppliance::new(limit_w),
            ManualClock::new(),
        )
    }

    #[test]
    fn test_first_tick_logs_in_and_reads() {
        let mut driver = driver(10_000);
        let now = driver.clock().now();
        let outcome = driver.tick(now);

        assert!(outcome.did_work);
        assert_eq!(outcome.mode, ControlState::Normal);
        let calls = driver.api().calls();
        assert_eq!(calls[0], Operation::Login);
        assert_eq!(calls[1], Operation::TelemetryFast);
        assert_eq!(calls[2], Operation::TelemetrySlow);
        assert_eq!(driver.api().count(Operation::Login), 1);
    }

    #[test]
    fn test_nothing_due_means_no_work() {
        let mut driver = driver(10_000);
        let now = driver.clock().now();
        driver.tick(now);
        let outcome = driver.tick(now + Duration::from_millis(10));
        assert!(!outcome.did_work);
    }

    #[test]
    fn test_no_write_without_sample() {
        let mut driver = driver(10_000);
        driver
            .api_mut()
            .fail_next(Operation::TelemetryFast, ApiError::Transport("timeout".to_string()));
        let now = driver.clock().now();
        driver.tick(now);

        assert_eq!(driver.api().count(Operation::GetConfiguration), 0);
        assert!(driver.api().writes().is_empty());
        assert_eq!(driver.state().fault.comm_fails(), 0);
    }

    #[test]
    fn test_fault_mode_blocks_writes() {
        let mut driver = driver(10_000);
        driver.state.mode = ControlState::Fault;
        let now = driver.clock().now();
        driver.tick(now);
        driver.apply_safe_limit(now);

        assert!(driver.api().count(Operation::TelemetryFast) > 0);
        assert!(driver.api().writes().is_empty());
        assert_eq!(driver.api().export_limit(), 10_000);
    }

    #[test]
    fn test_run_returns_when_stopped() {
        let mut driver = driver(10_000);
        driver.stop_handle().store(true, Ordering::Relaxed);
        driver.run();
        assert!(driver.api().calls().is_empty());
    }
}
