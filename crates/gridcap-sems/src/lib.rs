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

//! HTTP transport for the SEMS appliance web API
//!
//! Implements [`gridcap_core::ApplianceApi`] on top of a blocking `reqwest`
//! client: login/logout, overview data and status polling, and the
//! configuration object read and write.

pub mod client;

pub use client::SemsClient;
