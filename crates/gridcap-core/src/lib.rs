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

//! GridCap core - closed-loop grid export-limit controller
//!
//! Samples the site meter through the appliance API and steers the
//! appliance's grid export limit toward a net-power target, falling back to a
//! conservative SAFE policy on sustained deviation and to an OFFLINE backoff
//! cycle when communication is lost. The HTTP transport lives in
//! `gridcap-sems`; this crate only sees the [`ApplianceApi`] trait.

pub mod api;
pub mod clock;
pub mod config;
pub mod config_store;
pub mod controller;
pub mod driver;
pub mod error;
pub mod safe_mode;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use api::{ApplianceApi, Credentials, md5_hex};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ControllerConfig;
pub use driver::{Driver, TickOutcome};
pub use error::{ApiError, ApiResult};
pub use state::{ControlState, ControllerState};
pub use types::{ConfigSnapshot, ExportLimitControl, MeterSample, StatusSnapshot, TelemetrySnapshot};
