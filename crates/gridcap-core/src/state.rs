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

//! Mutable control-loop state, threaded through every driver tick

use crate::api::Credentials;
use crate::config::ControllerConfig;
use crate::config_store::ConfigStore;
use crate::controller::Controller;
use crate::safe_mode::SafeModeSupervisor;
use crate::scheduler::Timers;
use crate::session::SessionManager;
use crate::supervisor::FaultSupervisor;
use crate::telemetry::TelemetryReader;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Operating mode of the loop
///
/// Actuator writes happen only in `Normal` and `Safe`. `Fault` is a
/// pass-through on the way to `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    Normal,
    Safe,
    Fault,
    Offline,
}

impl ControlState {
    pub fn allows_writes(self) -> bool {
        matches!(self, Self::Normal | Self::Safe)
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "NORMAL",
            Self::Safe => "SAFE",
            Self::Fault => "FAULT",
            Self::Offline => "OFFLINE",
        };
        f.write_str(name)
    }
}

/// Everything the loop mutates
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub mode: ControlState,
    pub session: SessionManager,
    pub telemetry: TelemetryReader,
    pub config_store: ConfigStore,
    pub controller: Controller,
    pub safe: SafeModeSupervisor,
    pub fault: FaultSupervisor,
    pub timers: Timers,
}

impl ControllerState {
    pub fn new(config: &ControllerConfig, credentials: Credentials, now: Instant) -> Self {
        Self {
            mode: ControlState::Normal,
            session: SessionManager::new(credentials, config.supervisor.auto_relogin),
            telemetry: TelemetryReader::new(config.control.meter_positive_is_export),
            config_store: ConfigStore::new(config.timing.resync_config_period()),
            controller: Controller::new(config.control.clone(), config.ooc_alarm.clone()),
            safe: SafeModeSupervisor::new(config.safe_mode.clone()),
            fault: FaultSupervisor::new(config.supervisor.max_consecutive_comm_fails),
            timers: Timers::new(config, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ControlState::Normal.to_string(), "NORMAL");
        assert_eq!(ControlState::Offline.to_string(), "OFFLINE");
    }

    #[test]
    fn test_writes_only_in_normal_and_safe() {
        assert!(ControlState::Normal.allows_writes());
        assert!(ControlState::Safe.allows_writes());
        assert!(!ControlState::Fault.allows_writes());
        assert!(!ControlState::Offline.allows_writes());
    }

    #[test]
    fn test_serializes_upper_case() {
        let json = serde_json::to_string(&ControlState::Safe).unwrap();
        assert_eq!(json, "\"SAFE\"");
    }

    #[test]
    fn test_initial_state() {
        let config = ControllerConfig::default();
        let state = ControllerState::new(
            &config,
            Credentials::from_password("admin", "x"),
            Instant::now(),
        );
        assert_eq!(state.mode, ControlState::Normal);
        assert!(!state.session.has_token());
        assert!(state.telemetry.latest_sample().is_none());
        assert!(!state.safe.is_active());
        assert_eq!(state.fault.comm_fails(), 0);
    }
}
