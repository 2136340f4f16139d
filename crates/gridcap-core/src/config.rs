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

//! Controller configuration
//!
//! Every value is supplied once at startup and stays immutable for the
//! lifetime of the process. All fields have defaults so a partial TOML file is
//! enough to run.

use crate::api::Credentials;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable consulted when no password is present in the file
pub const PASSWORD_ENV: &str = "GRIDCAP_PASSWORD";

/// Complete controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Appliance connection and credentials
    pub appliance: ApplianceConfig,

    /// Control objective and loop tuning
    pub control: ControlConfig,

    /// Degraded policy for sustained violations
    pub safe_mode: SafeModeConfig,

    /// Out-of-control alarm for a negative target the limit cannot reach
    pub ooc_alarm: OocAlarmConfig,

    /// Polling and write periods
    pub timing: TimingConfig,

    /// Communication fault handling
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplianceConfig {
    /// Base URL of the appliance web interface (e.g. "http://10.1.1.118")
    pub base_url: String,

    pub user: String,

    /// Plain-text password, hashed before it leaves the process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Pre-hashed password (MD5, lower-case hex); wins over `password`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_md5: Option<String>,

    /// Value of the `lang` request header
    pub lang: String,

    /// Timeout for login, telemetry and configuration reads (seconds)
    pub request_timeout_s: f64,

    /// Timeout for configuration writes (seconds)
    pub write_timeout_s: f64,
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://10.1.1.118".to_owned(),
            user: "admin".to_owned(),
            password: None,
            password_md5: None,
            lang: "enGB".to_owned(),
            request_timeout_s: 8.0,
            write_timeout_s: 12.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Desired meter reading (W). Positive requests export, negative requests import.
    pub target_meter_w: f64,

    /// true: a positive raw `meterPower` means export; false: it means import
    pub meter_positive_is_export: bool,

    pub export_limit_min_w: f64,
    pub export_limit_max_w: f64,

    /// Error tolerance with no corrective action (W)
    pub deadband_w: f64,

    /// Maximum setpoint change per write (W)
    pub ramp_w_per_step: f64,

    /// Error magnitude that counts as a violation (W)
    pub violation_limit_w: f64,

    /// Continuous violation time before SAFE mode (seconds)
    pub violation_time_s: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            target_meter_w: 25_000.0,
            meter_positive_is_export: true,
            export_limit_min_w: 0.0,
            export_limit_max_w: 200_000.0,
            deadband_w: 200.0,
            ramp_w_per_step: 10_000.0,
            violation_limit_w: 3_000.0,
            violation_time_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeModeConfig {
    /// When disabled, a sustained violation escalates to FAULT instead
    pub enabled: bool,

    /// How often the conservative limit is re-asserted (seconds)
    pub apply_period_s: f64,

    /// Added to a non-negative target when computing the safe limit (W)
    pub export_margin_w: f64,

    /// Time the error must stay inside the deadband to leave SAFE mode (seconds)
    pub exit_deadband_time_s: f64,
}

impl Default for SafeModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            apply_period_s: 5.0,
            export_margin_w: 0.0,
            exit_deadband_time_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OocAlarmConfig {
    pub enabled: bool,

    /// Export above this with the limit at minimum is out of control (W)
    pub export_threshold_w: f64,

    /// How long the condition must last before the alarm latches (seconds)
    pub time_s: f64,
}

impl Default for OocAlarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_threshold_w: 500.0,
            time_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub read_data_period_s: f64,
    pub read_status_period_s: f64,
    pub write_period_s: f64,

    /// Forced configuration re-fetch interval (seconds)
    pub resync_config_period_s: f64,

    /// Sleep between loop passes when nothing was due (milliseconds)
    pub idle_sleep_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            read_data_period_s: 0.25,
            read_status_period_s: 5.0,
            write_period_s: 0.5,
            resync_config_period_s: 60.0,
            idle_sleep_ms: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Consecutive transient failures before FAULT
    pub max_consecutive_comm_fails: u32,

    /// Backoff between login attempts while OFFLINE (seconds)
    pub offline_retry_s: f64,

    /// Log in again automatically after the token is invalidated
    pub auto_relogin: bool,

    /// Send a logout request on shutdown
    pub graceful_logout: bool,

    /// How often the token age is logged (seconds, 0 disables)
    pub token_age_log_period_s: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_comm_fails: 5,
            offline_retry_s: 30.0,
            auto_relogin: true,
            graceful_logout: true,
            token_age_log_period_s: 60.0,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

impl TimingConfig {
    pub fn read_data_period(&self) -> Duration {
        secs(self.read_data_period_s)
    }

    pub fn read_status_period(&self) -> Duration {
        secs(self.read_status_period_s)
    }

    pub fn write_period(&self) -> Duration {
        secs(self.write_period_s)
    }

    pub fn resync_config_period(&self) -> Duration {
        secs(self.resync_config_period_s)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl ApplianceConfig {
    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_s)
    }

    pub fn write_timeout(&self) -> Duration {
        secs(self.write_timeout_s)
    }

    /// Login credentials; a pre-hashed password wins over a plain one
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.password_md5, &self.password) {
            (Some(hash), _) => Ok(Credentials::from_hash(self.user.as_str(), hash.as_str())),
            (None, Some(password)) => Ok(Credentials::from_password(self.user.as_str(), password)),
            (None, None) => anyhow::bail!("No appliance password configured"),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file and validate it
    ///
    /// A missing password is taken from `GRIDCAP_PASSWORD` when set.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        if config.appliance.password.is_none()
            && config.appliance.password_md5.is_none()
            && let Ok(password) = std::env::var(PASSWORD_ENV)
        {
            config.appliance.password = Some(password);
        }

        config.validate()?;
        info!("✅ Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Serialize to TOML with credentials removed
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut redacted = self.clone();
        if redacted.appliance.password.is_some() {
            redacted.appliance.password = Some("<redacted>".to_owned());
        }
        if redacted.appliance.password_md5.is_some() {
            redacted.appliance.password_md5 = Some("<redacted>".to_owned());
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.appliance.base_url.trim().is_empty() {
            anyhow::bail!("appliance.base_url cannot be empty");
        }
        if self.appliance.user.trim().is_empty() {
            anyhow::bail!("appliance.user cannot be empty");
        }
        if self.appliance.password.is_none() && self.appliance.password_md5.is_none() {
            anyhow::bail!(
                "No appliance password: set appliance.password, appliance.password_md5 or {PASSWORD_ENV}"
            );
        }
        if let Some(ref hash) = self.appliance.password_md5
            && (hash.len() != 32 || !hash.chars().all(|c| c.is_ascii_hexdigit()))
        {
            anyhow::bail!("appliance.password_md5 must be 32 hexadecimal characters");
        }
        if self.appliance.request_timeout_s <= 0.0 || self.appliance.write_timeout_s <= 0.0 {
            anyhow::bail!("appliance request timeouts must be positive");
        }

        let control = &self.control;
        if !control.target_meter_w.is_finite() {
            anyhow::bail!("control.target_meter_w must be a finite number");
        }
        if control.export_limit_min_w < 0.0 {
            anyhow::bail!(
                "control.export_limit_min_w must be non-negative, got {}",
                control.export_limit_min_w
            );
        }
        if control.export_limit_min_w >= control.export_limit_max_w {
            anyhow::bail!(
                "control.export_limit_min_w ({}) must be below control.export_limit_max_w ({})",
                control.export_limit_min_w,
                control.export_limit_max_w
            );
        }
        if control.export_limit_min_w.ceil() > control.export_limit_max_w.floor() {
            anyhow::bail!(
                "control export limit range [{}, {}] contains no whole watt",
                control.export_limit_min_w,
                control.export_limit_max_w
            );
        }
        if control.deadband_w < 0.0 {
            anyhow::bail!("control.deadband_w must be non-negative");
        }
        if control.ramp_w_per_step <= 0.0 {
            anyhow::bail!("control.ramp_w_per_step must be positive");
        }
        if control.violation_limit_w <= control.deadband_w {
            anyhow::bail!(
                "control.violation_limit_w ({}) must exceed control.deadband_w ({})",
                control.violation_limit_w,
                control.deadband_w
            );
        }
        if control.violation_time_s <= 0.0 {
            anyhow::bail!("control.violation_time_s must be positive");
        }

        if self.safe_mode.apply_period_s <= 0.0 || self.safe_mode.exit_deadband_time_s <= 0.0 {
            anyhow::bail!("safe_mode periods must be positive");
        }
        if self.ooc_alarm.time_s <= 0.0 {
            anyhow::bail!("ooc_alarm.time_s must be positive");
        }

        let timing = &self.timing;
        for (name, value) in [
            ("timing.read_data_period_s", timing.read_data_period_s),
            ("timing.read_status_period_s", timing.read_status_period_s),
            ("timing.write_period_s", timing.write_period_s),
            ("timing.resync_config_period_s", timing.resync_config_period_s),
        ] {
            if value <= 0.0 {
                anyhow::bail!("{name} must be positive, got {value}");
            }
        }

        if self.supervisor.max_consecutive_comm_fails == 0 {
            anyhow::bail!("supervisor.max_consecutive_comm_fails must be at least 1");
        }
        if self.supervisor.offline_retry_s <= 0.0 {
            anyhow::bail!("supervisor.offline_retry_s must be positive");
        }
        if self.supervisor.token_age_log_period_s < 0.0 {
            anyhow::bail!("supervisor.token_age_log_period_s must be non-negative");
        }

        Ok(())
    }
}
