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

//! Error types for appliance communication

use thiserror::Error;

/// Errno the appliance returns when the session token is no longer accepted
pub const ERRNO_INVALID_TOKEN: i64 = 40000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Bad credentials or a rejected login
    #[error("login rejected: {0}")]
    AuthFailure(String),

    /// Session expired on the appliance side
    #[error("session token rejected by appliance")]
    InvalidToken,

    /// Timeout, refused connection, HTTP error status or a non-JSON body
    #[error("transport failure: {0}")]
    Transport(String),

    /// Appliance answered a configuration write with a non-zero errno
    #[error("configuration write rejected (errno {errno}): {message}")]
    ConfigWriteRejected { errno: i64, message: String },
}

impl ApiError {
    /// Whether this error counts toward the consecutive communication-failure threshold.
    ///
    /// An invalid token is recovered by logging in again and is not counted.
    pub fn counts_as_comm_failure(&self) -> bool {
        !matches!(self, Self::InvalidToken)
    }

    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
