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

//! Communication-failure accounting and OFFLINE bookkeeping

use crate::error::ApiError;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Counts consecutive communication failures across every appliance operation
#[derive(Debug, Clone)]
pub struct FaultSupervisor {
    max_consecutive_fails: u32,
    comm_fails: u32,
    offline_since: Option<Instant>,
    offline_reason: Option<String>,
}

impl FaultSupervisor {
    pub fn new(max_consecutive_fails: u32) -> Self {
        Self {
            max_consecutive_fails,
            comm_fails: 0,
            offline_since: None,
            offline_reason: None,
        }
    }

    pub fn comm_fails(&self) -> u32 {
        self.comm_fails
    }

    pub fn is_offline(&self) -> bool {
        self.offline_since.is_some()
    }

    pub fn offline_reason(&self) -> Option<&str> {
        self.offline_reason.as_deref()
    }

    pub fn record_success(&mut self) {
        self.comm_fails = 0;
    }

    /// Account for a failed operation; returns `true` when the threshold is reached
    ///
    /// [`ApiError::InvalidToken`] is not counted: the session is renewed instead.
    pub fn record_failure(&mut self, operation: &str, err: &ApiError) -> bool {
        if !err.counts_as_comm_failure() {
            info!("🔑 [{}] Invalid token, re-login scheduled", operation);
            return false;
        }

        self.comm_fails = self.comm_fails.saturating_add(1);
        warn!(
            "⚠️ [{}] {} (comm_fails={}/{})",
            operation, err, self.comm_fails, self.max_consecutive_fails
        );
        self.comm_fails >= self.max_consecutive_fails
    }

    /// FAULT is logged and passed straight through to OFFLINE
    pub fn enter_offline(&mut self, reason: impl Into<String>, now: Instant) {
        let reason = reason.into();
        if self.comm_fails >= self.max_consecutive_fails {
            error!(
                "🛑 [FAULT] {} consecutive communication failures",
                self.comm_fails
            );
        }
        warn!("📴 [OFFLINE] ENTER: {}", reason);
        self.offline_since = Some(now);
        self.offline_reason = Some(reason);
    }

    /// Leave OFFLINE; returns how long it lasted
    pub fn exit_offline(&mut self, now: Instant) -> Duration {
        let duration = self
            .offline_since
            .take()
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        self.offline_reason = None;
        self.comm_fails = 0;
        info!("📶 [OFFLINE] EXIT after {:.1}s", duration.as_secs_f64());
        duration
    }
}
