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

//! Cached access to the appliance configuration object
//!
//! The full object is fetched once and re-used for writes until it is older
//! than the resync period, so out-of-band changes are picked up without a
//! fetch before every write.

use crate::api::ApplianceApi;
use crate::error::{ApiError, ApiResult};
use crate::types::{ConfigSnapshot, ExportLimitControl};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    resync_period: Duration,
    cache: Option<ConfigSnapshot>,
    last_sync: Option<Instant>,
}

impl ConfigStore {
    pub fn new(resync_period: Duration) -> Self {
        Self {
            resync_period,
            cache: None,
            last_sync: None,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match (self.cache.as_ref(), self.last_sync) {
            (Some(_), Some(synced)) => now.saturating_duration_since(synced) >= self.resync_period,
            _ => true,
        }
    }

    /// Cached snapshot, fetched first when absent or stale
    pub fn snapshot<A: ApplianceApi>(
        &mut self,
        api: &mut A,
        token: &str,
        now: Instant,
    ) -> ApiResult<&ConfigSnapshot> {
        if self.is_stale(now) {
            debug!("⚙️ [CONFIG] Fetching configuration");
            self.cache = Some(api.get_configuration(token)?);
            self.last_sync = Some(now);
        }

        self.cache
            .as_ref()
            .ok_or_else(|| ApiError::Transport("configuration snapshot unavailable".to_owned()))
    }

    /// Export-limit section of the (possibly refreshed) snapshot
    pub fn export_limit<A: ApplianceApi>(
        &mut self,
        api: &mut A,
        token: &str,
        now: Instant,
    ) -> ApiResult<ExportLimitControl> {
        Ok(self.snapshot(api, token, now)?.export_limit())
    }

    /// Read-modify-write of the full object with only the export limit changed
    ///
    /// On success the written object becomes the cache. On failure the cache
    /// is dropped, since the appliance state is unknown.
    pub fn write_export_limit<A: ApplianceApi>(
        &mut self,
        api: &mut A,
        token: &str,
        now: Instant,
        limit_w: i64,
    ) -> ApiResult<()> {
        let updated = self.snapshot(api, token, now)?.with_export_limit(limit_w);

        match api.set_configuration(token, &updated) {
            Ok(()) => {
                self.cache = Some(updated);
                Ok(())
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Force a fetch on next access
    pub fn invalidate(&mut self) {
        self.cache = None;
        self.last_sync = None;
    }

    pub fn cached(&self) -> Option<&ConfigSnapshot> {
        self.cache.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Credentials;
    use crate::testing::{FakeAppliance, Operation};
    use serde_json::{Value, json};

    const RESYNC: Duration = Duration::from_secs(60);

    fn setup() -> (FakeAppliance, String, ConfigStore) {
        let mut api = FakeAppliance::new(10_000);
        let token = api.login(&Credentials::from_password("admin", "x")).unwrap();
        (api, token, ConfigStore::new(RESYNC))
    }

    #[test]
    fn test_snapshot_is_cached_until_stale() {
        let (mut api, token, mut store) = setup();
        let start = Instant::now();

        store.snapshot(&mut api, &token, start).unwrap();
        store
            .snapshot(&mut api, &token, start + Duration::from_secs(30))
            .unwrap();
        assert_eq!(api.count(Operation::GetConfiguration), 1);

        store.snapshot(&mut api, &token, start + RESYNC).unwrap();
        assert_eq!(api.count(Operation::GetConfiguration), 2);
    }

    #[test]
    fn test_resync_picks_up_out_of_band_change() {
        let (mut api, token, mut store) = setup();
        let start = Instant::now();

        let limit = store.export_limit(&mut api, &token, start).unwrap();
        assert_eq!(limit.limit_w, 10_000);

        api.set_export_limit(3_000);
        let limit = store
            .export_limit(&mut api, &token, start + Duration::from_secs(1))
            .unwrap();
        assert_eq!(limit.limit_w, 10_000);

        let limit = store.export_limit(&mut api, &token, start + RESYNC).unwrap();
        assert_eq!(limit.limit_w, 3_000);
    }

    #[test]
    fn test_write_round_trips_unrelated_fields() {
        let (mut api, token, mut store) = setup();
        let before = api.configuration().clone();

        store
            .write_export_limit(&mut api, &token, Instant::now(), 20_000)
            .unwrap();

        let after = api.configuration().as_map();
        for (key, value) in before.as_map() {
            if key != "POWER_LIMIT_CONTROL" {
                assert_eq!(after.get(key), Some(value), "field {key} changed");
            }
        }
        assert_eq!(
            after.get("POWER_LIMIT_CONTROL"),
            Some(&json!({
                "PowerLimit_Enable": true,
                "GridExportLimit": 20000,
                "PowerLimit_Mode": 1
            }))
        );
        assert_eq!(
            store.cached().map(|c| c.export_limit().limit_w),
            Some(20_000)
        );
        assert_eq!(api.count(Operation::GetConfiguration), 1);
    }

    #[test]
    fn test_failed_write_drops_cache() {
        let (mut api, token, mut store) = setup();
        let now = Instant::now();
        api.fail_next(
            Operation::SetConfiguration,
            ApiError::ConfigWriteRejected {
                errno: 1,
                message: "busy".to_string(),
            },
        );

        let result = store.write_export_limit(&mut api, &token, now, 5_000);
        assert!(matches!(result, Err(ApiError::ConfigWriteRejected { .. })));
        assert!(store.cached().is_none());
        assert_eq!(api.export_limit(), 10_000);

        store.snapshot(&mut api, &token, now).unwrap();
        assert_eq!(api.count(Operation::GetConfiguration), 2);
    }

    #[test]
    fn test_cache_serializes_as_plain_object() {
        let (mut api, token, mut store) = setup();
        let snapshot = store.snapshot(&mut api, &token, Instant::now()).unwrap();
        let value = serde_json::to_value(snapshot).unwrap();
        assert!(matches!(value, Value::Object(_)));
        assert_eq!(value["SITE"]["name"], "test-site");
    }
}
