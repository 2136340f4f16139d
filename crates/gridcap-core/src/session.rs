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

//! Session lifecycle against the appliance

use crate::api::{ApplianceApi, Credentials};
use crate::error::{ApiError, ApiResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Token currently held, if any
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: Option<String>,
    pub issued_at: Option<Instant>,
}

/// Owns the single session shared by every appliance operation
#[derive(Debug, Clone)]
pub struct SessionManager {
    credentials: Credentials,
    session: Session,
    auto_relogin: bool,
}

impl SessionManager {
    pub fn new(credentials: Credentials, auto_relogin: bool) -> Self {
        Self {
            credentials,
            session: Session::default(),
            auto_relogin,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.session.token.as_deref()
    }

    pub fn has_token(&self) -> bool {
        self.session.token.is_some()
    }

    /// Log in unconditionally, replacing any held token
    pub fn login<A: ApplianceApi>(&mut self, api: &mut A, now: Instant) -> ApiResult<()> {
        match api.login(&self.credentials) {
            Ok(token) => {
                info!("🔑 [AUTH] Logged in as {}", self.credentials.user);
                debug!("   Token: {}", token);
                self.session = Session {
                    token: Some(token),
                    issued_at: Some(now),
                };
                Ok(())
            }
            Err(e) => {
                warn!("⚠️ [AUTH] Login failed: {}", e);
                self.session = Session::default();
                Err(e)
            }
        }
    }

    /// Make sure a token is held, logging in when there is none
    ///
    /// With automatic re-login disabled a missing token is reported as an
    /// authentication failure without touching the network.
    pub fn ensure_valid<A: ApplianceApi>(&mut self, api: &mut A, now: Instant) -> ApiResult<()> {
        if self.has_token() {
            return Ok(());
        }
        if !self.auto_relogin {
            return Err(ApiError::AuthFailure(
                "no session and automatic re-login is disabled".to_owned(),
            ));
        }
        self.login(api, now)
    }

    /// Drop the local token after the appliance rejected it
    pub fn invalidate(&mut self) {
        if self.session.token.take().is_some() {
            info!("🔑 [AUTH] Session token invalidated");
        }
        self.session.issued_at = None;
    }

    /// Time since the held token was issued
    pub fn token_age(&self, now: Instant) -> Option<Duration> {
        self.session
            .issued_at
            .map(|issued| now.saturating_duration_since(issued))
    }

    /// Best-effort logout; never fails
    pub fn logout<A: ApplianceApi>(&mut self, api: &mut A) {
        let Some(token) = self.session.token.take() else {
            return;
        };
        self.session.issued_at = None;

        info!("🔑 [AUTH] Logging out");
        match api.logout(&token) {
            Ok(()) => info!("🔑 [AUTH] Logout sent"),
            Err(e) => warn!("⚠️ [AUTH] Logout failed (ignored): {}", e),
        }
    }
}
