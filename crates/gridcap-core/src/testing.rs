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

//! In-memory appliance for exercising the control loop without a network

use crate::api::{ApplianceApi, Credentials};
use crate::error::{ApiError, ApiResult};
use crate::types::{ConfigSnapshot, StatusSnapshot, TelemetrySnapshot};
use serde_json::{Map, json};
use std::collections::{HashMap, VecDeque};

/// Appliance operation, used to script failures and inspect calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Login,
    Logout,
    TelemetryFast,
    TelemetrySlow,
    GetConfiguration,
    SetConfiguration,
}

/// Scriptable fake of the appliance
///
/// Tokens are checked like the real device: once the session is expired every
/// call carrying the old token fails with [`ApiError::InvalidToken`].
#[derive(Debug, Clone)]
pub struct FakeAppliance {
    valid_token: Option<String>,
    logins: u32,
    meter_power_w: f64,
    status: StatusSnapshot,
    config: ConfigSnapshot,
    failures: HashMap<Operation, VecDeque<ApiError>>,
    calls: Vec<Operation>,
    writes: Vec<i64>,
}

impl FakeAppliance {
    /// Appliance with export limiting enabled at `limit_w` and some unrelated settings
    pub fn new(limit_w: i64) -> Self {
        let mut config = Map::new();
        config.insert(
            "POWER_LIMIT_CONTROL".to_owned(),
            json!({
                "PowerLimit_Enable": true,
                "GridExportLimit": limit_w,
                "PowerLimit_Mode": 1
            }),
        );
        config.insert("BATTERY".to_owned(), json!({"soc_min": 10, "soc_max": 95}));
        config.insert("SITE".to_owned(), json!({"name": "test-site"}));

        Self {
            valid_token: None,
            logins: 0,
            meter_power_w: 0.0,
            status: StatusSnapshot::default(),
            config: ConfigSnapshot::new(config),
            failures: HashMap::new(),
            calls: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Raw `meterPower` reported by the next fast reads
    pub fn set_meter(&mut self, raw_w: f64) {
        self.meter_power_w = raw_w;
    }

    pub fn set_status(&mut self, status: StatusSnapshot) {
        self.status = status;
    }

    /// Change the limit behind the controller's back
    pub fn set_export_limit(&mut self, limit_w: i64) {
        self.config = self.config.with_export_limit(limit_w);
    }

    /// Queue a failure for the next call of `op`
    pub fn fail_next(&mut self, op: Operation, error: ApiError) {
        self.failures.entry(op).or_default().push_back(error);
    }

    /// Queue `times` identical failures for `op`
    pub fn fail_times(&mut self, op: Operation, error: &ApiError, times: usize) {
        for _ in 0..times {
            self.fail_next(op, error.clone());
        }
    }

    /// Forget the active session so the held token is rejected
    pub fn expire_session(&mut self) {
        self.valid_token = None;
    }

    pub fn export_limit(&self) -> i64 {
        self.config.export_limit().limit_w
    }

    pub fn configuration(&self) -> &ConfigSnapshot {
        &self.config
    }

    /// Every limit accepted by a configuration write, in order
    pub fn writes(&self) -> &[i64] {
        &self.writes
    }

    pub fn calls(&self) -> &[Operation] {
        &self.calls
    }

    pub fn count(&self, op: Operation) -> usize {
        self.calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn begin(&mut self, op: Operation) -> ApiResult<()> {
        self.calls.push(op);
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_token(&self, token: &str) -> ApiResult<()> {
        match self.valid_token.as_deref() {
            Some(valid) if valid == token => Ok(()),
            _ => Err(ApiError::InvalidToken),
        }
    }
}

impl ApplianceApi for FakeAppliance {
    fn login(&mut self, _credentials: &Credentials) -> ApiResult<String> {
        self.begin(Operation::Login)?;
        self.logins += 1;
        let token = format!("token-{}", self.logins);
        self.valid_token = Some(token.clone());
        Ok(token)
    }

    fn logout(&mut self, token: &str) -> ApiResult<()> {
        self.begin(Operation::Logout)?;
        self.check_token(token)?;
        self.valid_token = None;
        Ok(())
    }

    fn telemetry_fast(&mut self, token: &str) -> ApiResult<TelemetrySnapshot> {
        self.begin(Operation::TelemetryFast)?;
        self.check_token(token)?;
        Ok(TelemetrySnapshot {
            meter_power_w: self.meter_power_w,
            ..Default::default()
        })
    }

    fn telemetry_slow(&mut self, token: &str) -> ApiResult<StatusSnapshot> {
        self.begin(Operation::TelemetrySlow)?;
        self.check_token(token)?;
        Ok(self.status.clone())
    }

    fn get_configuration(&mut self, token: &str) -> ApiResult<ConfigSnapshot> {
        self.begin(Operation::GetConfiguration)?;
        self.check_token(token)?;
        Ok(self.config.clone())
    }

    fn set_configuration(&mut self, token: &str, config: &ConfigSnapshot) -> ApiResult<()> {
        self.begin(Operation::SetConfiguration)?;
        self.check_token(token)?;
        self.config = config.clone();
        self.writes.push(config.export_limit().limit_w);
        Ok(())
    }
}
