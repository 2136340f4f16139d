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

//! Telemetry polling and meter normalisation

use crate::api::ApplianceApi;
use crate::error::ApiResult;
use crate::types::{MeterSample, StatusSnapshot};
use tracing::{debug, info, warn};

/// Reads fast power data and slow device status, keeping the latest meter sample
#[derive(Debug, Clone)]
pub struct TelemetryReader {
    meter_positive_is_export: bool,
    latest_sample: Option<MeterSample>,
    status_alarm: bool,
}

impl TelemetryReader {
    pub fn new(meter_positive_is_export: bool) -> Self {
        Self {
            meter_positive_is_export,
            latest_sample: None,
            status_alarm: false,
        }
    }

    /// Poll `/overview/data` and return the sign-normalised meter sample
    pub fn read_fast<A: ApplianceApi>(&mut self, api: &mut A, token: &str) -> ApiResult<MeterSample> {
        let snapshot = api.telemetry_fast(token)?;
        let sample = MeterSample::from_raw(snapshot.meter_power_w, self.meter_positive_is_export);

        debug!(
            "📊 [DATA] meter={:.0}W load={:?} inverter={:?} pv={:?} battery={:?}",
            sample.signed_power_w,
            snapshot.load_power_w,
            snapshot.inverter_power_w,
            snapshot.pv_power_w,
            snapshot.battery_power_w
        );

        self.latest_sample = Some(sample);
        Ok(sample)
    }

    /// Poll `/overview/status` and report device alarm bits
    ///
    /// A set alarm bit is a diagnostic only; it never fails the read.
    pub fn read_slow<A: ApplianceApi>(&mut self, api: &mut A, token: &str) -> ApiResult<StatusSnapshot> {
        let status = api.telemetry_slow(token)?;

        if status.has_alarm() {
            warn!(
                "🚨 [STATUS] Device alarm reported: error1={:?} error3={:?}",
                status.error1, status.error3
            );
        } else if self.status_alarm {
            info!("✅ [STATUS] Device alarms cleared");
        }
        self.status_alarm = status.has_alarm();
        Ok(status)
    }

    /// Latest meter sample; `None` until the first successful fast read
    pub fn latest_sample(&self) -> Option<MeterSample> {
        self.latest_sample
    }

    pub fn status_alarm(&self) -> bool {
        self.status_alarm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Credentials;
    use crate::error::ApiError;
    use crate::testing::{FakeAppliance, Operation};

    fn logged_in(api: &mut FakeAppliance) -> String {
        api.login(&Credentials::from_password("admin", "x")).unwrap()
    }

    #[test]
    fn test_no_sample_before_first_read() {
        let reader = TelemetryReader::new(true);
        assert!(reader.latest_sample().is_none());
    }

    #[test]
    fn test_read_fast_positive_is_export() {
        let mut api = FakeAppliance::new(0);
        let token = logged_in(&mut api);
        api.set_meter(4200.0);

        let mut reader = TelemetryReader::new(true);
        let sample = reader.read_fast(&mut api, &token).unwrap();
        assert_eq!(sample.signed_power_w, 4200.0);
        assert_eq!(reader.latest_sample(), Some(sample));
    }

    #[test]
    fn test_read_fast_positive_is_import() {
        let mut api = FakeAppliance::new(0);
        let token = logged_in(&mut api);
        api.set_meter(4200.0);

        let mut reader = TelemetryReader::new(false);
        let sample = reader.read_fast(&mut api, &token).unwrap();
        assert_eq!(sample.signed_power_w, -4200.0);
    }

    #[test]
    fn test_failed_read_keeps_previous_sample() {
        let mut api = FakeAppliance::new(0);
        let token = logged_in(&mut api);
        api.set_meter(100.0);
        let mut reader = TelemetryReader::new(true);
        reader.read_fast(&mut api, &token).unwrap();

        api.fail_next(
            Operation::TelemetryFast,
            ApiError::Transport("timeout".to_string()),
        );
        api.set_meter(900.0);
        assert!(reader.read_fast(&mut api, &token).is_err());
        assert_eq!(reader.latest_sample().unwrap().signed_power_w, 100.0);
    }

    #[test]
    fn test_invalid_token_is_reported() {
        let mut api = FakeAppliance::new(0);
        let token = logged_in(&mut api);
        api.expire_session();

        let mut reader = TelemetryReader::new(true);
        assert_eq!(
            reader.read_fast(&mut api, &token),
            Err(ApiError::InvalidToken)
        );
        assert_eq!(
            reader.read_slow(&mut api, &token),
            Err(ApiError::InvalidToken)
        );
    }

    #[test]
    fn test_read_slow_tracks_alarm() {
        let mut api = FakeAppliance::new(0);
        let token = logged_in(&mut api);
        let mut reader = TelemetryReader::new(true);

        api.set_status(StatusSnapshot {
            error1: vec![0, 16],
            error3: vec![],
        });
        let status = reader.read_slow(&mut api, &token).unwrap();
        assert!(status.has_alarm());
        assert!(reader.status_alarm());

        api.set_status(StatusSnapshot::default());
        reader.read_slow(&mut api, &token).unwrap();
        assert!(!reader.status_alarm());
    }
}
