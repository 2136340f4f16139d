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

//! Appliance API seam
//!
//! The control loop only talks to the appliance through [`ApplianceApi`].
//! The production implementation lives in the `gridcap-sems` crate; tests use
//! an in-memory fake.

use crate::error::ApiResult;
use crate::types::{ConfigSnapshot, StatusSnapshot, TelemetrySnapshot};
use md5::{Digest, Md5};
use std::fmt;

/// Logical operations of the appliance HTTP/JSON control plane
pub trait ApplianceApi {
    /// Log in and return a session token
    fn login(&mut self, credentials: &Credentials) -> ApiResult<String>;

    /// Terminate the session. Callers ignore the outcome.
    fn logout(&mut self, token: &str) -> ApiResult<()>;

    /// Instantaneous power readings
    fn telemetry_fast(&mut self, token: &str) -> ApiResult<TelemetrySnapshot>;

    /// Slower device status including alarm bit-fields
    fn telemetry_slow(&mut self, token: &str) -> ApiResult<StatusSnapshot>;

    /// Full configuration object
    fn get_configuration(&mut self, token: &str) -> ApiResult<ConfigSnapshot>;

    /// Replace the full configuration object
    fn set_configuration(&mut self, token: &str, config: &ConfigSnapshot) -> ApiResult<()>;
}

/// Login credentials with the password already hashed for the wire
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password_md5: String,
}

impl Credentials {
    /// Build credentials from a plain-text password
    pub fn from_password(user: impl Into<String>, password: &str) -> Self {
        Self {
            user: user.into(),
            password_md5: md5_hex(password),
        }
    }

    /// Build credentials from a password that is already MD5-hashed
    pub fn from_hash(user: impl Into<String>, password_md5: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password_md5: password_md5.into().to_lowercase(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password_md5", &"<redacted>")
            .finish()
    }
}

/// Lower-case hex MD5 digest of a UTF-8 string
pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vectors() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_credentials_hash_password() {
        let creds = Credentials::from_password("admin", "abc");
        assert_eq!(creds.user, "admin");
        assert_eq!(creds.password_md5, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_credentials_from_hash_normalises_case() {
        let creds = Credentials::from_hash("admin", "900150983CD24FB0D6963F7D28E17F72");
        assert_eq!(creds.password_md5, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::from_password("admin", "abc");
        let debug = format!("{creds:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("900150983cd24fb0d6963f7d28e17f72"));
    }
}
