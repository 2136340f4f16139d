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

use gridcap_core::config::ApplianceConfig;
use gridcap_core::error::ERRNO_INVALID_TOKEN;
use gridcap_core::types::lenient_f64;
use gridcap_core::{
    ApiError, ApiResult, ApplianceApi, ConfigSnapshot, Credentials, StatusSnapshot,
    TelemetrySnapshot,
};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, ORIGIN, PRAGMA, REFERER};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, trace, warn};

const LOGIN_PATH: &str = "/sems/user/login";
const LOGOUT_PATH: &str = "/sems/user/logout";
const OVERVIEW_DATA_PATH: &str = "/sems/overview/data";
const OVERVIEW_STATUS_PATH: &str = "/sems/overview/status";
const GET_CONFIG_PATH: &str = "/sems/operation/get/configJson";
const SET_CONFIG_PATH: &str = "/sems/operation/set/configJson";

const ACCEPT_VALUE: &str = "application/json, text/plain, */*";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Logout gets a shorter budget; nothing waits on it
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(6);

/// Characters of a non-JSON body kept in the error message
const BODY_SNIPPET_LEN: usize = 200;

/// `{ "errno": ..., "result": ... }` wrapper around every SEMS response
#[derive(Debug, Deserialize)]
struct Envelope {
    errno: i64,
    #[serde(default, alias = "message")]
    msg: Option<String>,
    #[serde(default)]
    result: Value,
}

impl Envelope {
    fn describe(&self) -> String {
        self.msg
            .clone()
            .unwrap_or_else(|| self.result.to_string())
    }

    /// `result` for errno 0; invalid token and anything else mapped to errors
    fn into_result(self, operation: &str) -> ApiResult<Value> {
        match self.errno {
            0 => Ok(self.result),
            ERRNO_INVALID_TOKEN => Err(ApiError::InvalidToken),
            errno => Err(ApiError::Transport(format!(
                "{operation}: errno {errno}: {}",
                self.describe()
            ))),
        }
    }
}

/// Blocking client for the SEMS appliance web API
#[derive(Debug, Clone)]
pub struct SemsClient {
    base_url: String,
    lang: String,
    client: Client,
    write_timeout: Duration,
}

impl SemsClient {
    pub fn new(
        base_url: impl Into<String>,
        lang: impl Into<String>,
        request_timeout: Duration,
        write_timeout: Duration,
    ) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {e}")))?;

        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            lang: lang.into(),
            client,
            write_timeout,
        })
    }

    pub fn from_config(config: &ApplianceConfig) -> ApiResult<Self> {
        Self::new(
            config.base_url.as_str(),
            config.lang.as_str(),
            config.request_timeout(),
            config.write_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Headers common to every request
    fn with_headers(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .header(ACCEPT, ACCEPT_VALUE)
            .header("lang", self.lang.as_str())
            .header("token", token)
            .header(ORIGIN, self.base_url.as_str())
            .header(REFERER, format!("{}/", self.base_url))
            .header(PRAGMA, "no-cache")
            .header(CACHE_CONTROL, "no-cache")
    }

    fn get(&self, path: &str, token: &str, operation: &str) -> ApiResult<Envelope> {
        let url = self.url(path);
        debug!("🔍 [SEMS] GET {}", url);

        let request = self.with_headers(self.client.get(&url), token);
        let response = request.send().map_err(|e| transport(operation, &e))?;
        read_envelope(response, operation)
    }

    /// POST with a JSON text body sent as a form post, the way the web UI does
    fn post(
        &self,
        path: &str,
        token: &str,
        body: Option<String>,
        timeout: Option<Duration>,
        operation: &str,
    ) -> ApiResult<Envelope> {
        let url = self.url(path);
        debug!("🔍 [SEMS] POST {}", url);

        let mut request = self.with_headers(self.client.post(&url), token);
        if let Some(body) = body {
            trace!("   Body: {}", body);
            request = request
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .header("x-requested-with", "XMLHttpRequest")
                .body(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().map_err(|e| transport(operation, &e))?;
        read_envelope(response, operation)
    }
}

fn transport(operation: &str, err: &reqwest::Error) -> ApiError {
    ApiError::Transport(format!("{operation}: {err}"))
}

/// Check status and content type, then parse the envelope
fn read_envelope(response: Response, operation: &str) -> ApiResult<Envelope> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Transport(format!("{operation}: HTTP {status}")));
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));
    let body = response.text().map_err(|e| transport(operation, &e))?;

    if !is_json {
        let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
        warn!("⚠️ [SEMS] {} returned non-JSON body: {}", operation, snippet);
        return Err(ApiError::Transport(format!(
            "{operation}: non-JSON response: {snippet}"
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| ApiError::Transport(format!("{operation}: malformed response: {e}")))
}

fn parse_telemetry(result: &Value) -> ApiResult<TelemetrySnapshot> {
    let data = result.get("data").unwrap_or(&Value::Null);
    let field = |name: &str| data.get(name).and_then(lenient_f64);

    let meter_power_w = field("meterPower").ok_or_else(|| {
        ApiError::Transport("overview/data: missing or non-numeric meterPower".to_owned())
    })?;

    Ok(TelemetrySnapshot {
        meter_power_w,
        load_power_w: field("loadPower"),
        inverter_power_w: field("inverterPower"),
        pv_power_w: field("PVPower"),
        battery_power_w: field("batteryPower"),
    })
}

fn alarm_bits(value: Option<&Value>) -> Vec<i64> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(lenient_f64)
                .map(|bits| bits as i64)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_status(result: &Value) -> StatusSnapshot {
    let data = result.get("data").unwrap_or(&Value::Null);
    StatusSnapshot {
        error1: alarm_bits(data.get("error1")),
        error3: alarm_bits(data.get("error3")),
    }
}

impl ApplianceApi for SemsClient {
    fn login(&mut self, credentials: &Credentials) -> ApiResult<String> {
        let body = json!({
            "user": credentials.user,
            "password": credentials.password_md5,
        });

        let envelope = self.post(LOGIN_PATH, "none", Some(body.to_string()), None, "login")?;
        if envelope.errno != 0 {
            return Err(ApiError::AuthFailure(format!(
                "errno {}: {}",
                envelope.errno,
                envelope.describe()
            )));
        }

        envelope
            .result
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ApiError::AuthFailure("login response carries no token".to_owned()))
    }

    fn logout(&mut self, token: &str) -> ApiResult<()> {
        // errno is irrelevant here; only transport problems are reported
        self.post(LOGOUT_PATH, token, None, Some(LOGOUT_TIMEOUT), "logout")
            .map(|_| ())
    }

    fn telemetry_fast(&mut self, token: &str) -> ApiResult<TelemetrySnapshot> {
        let result = self
            .get(OVERVIEW_DATA_PATH, token, "overview/data")?
            .into_result("overview/data")?;
        parse_telemetry(&result)
    }

    fn telemetry_slow(&mut self, token: &str) -> ApiResult<StatusSnapshot> {
        let result = self
            .get(OVERVIEW_STATUS_PATH, token, "overview/status")?
            .into_result("overview/status")?;
        Ok(parse_status(&result))
    }

    fn get_configuration(&mut self, token: &str) -> ApiResult<ConfigSnapshot> {
        let result = self
            .get(GET_CONFIG_PATH, token, "get/configJson")?
            .into_result("get/configJson")?;

        match result {
            Value::Object(map) => {
                debug!("⚙️ [SEMS] Configuration with {} sections", map.len());
                Ok(ConfigSnapshot::new(map))
            }
            other => Err(ApiError::Transport(format!(
                "get/configJson: result is not an object: {other}"
            ))),
        }
    }

    fn set_configuration(&mut self, token: &str, config: &ConfigSnapshot) -> ApiResult<()> {
        let body = serde_json::to_string(config)
            .map_err(|e| ApiError::Transport(format!("set/configJson: encode failed: {e}")))?;

        let envelope = self.post(
            SET_CONFIG_PATH,
            token,
            Some(body),
            Some(self.write_timeout),
            "set/configJson",
        )?;

        match envelope.errno {
            0 => Ok(()),
            ERRNO_INVALID_TOKEN => Err(ApiError::InvalidToken),
            errno => Err(ApiError::ConfigWriteRejected {
                errno,
                message: envelope.describe(),
            }),
        }
    }
}
