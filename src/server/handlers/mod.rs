pub mod dataset;
pub mod directory;
pub mod execution;
pub mod health;
pub mod metrics;
pub mod outputs;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::GatewayError;

/// Wrapper that converts `GatewayError` into an HTTP response.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let mut body = json!({
            "error": self.0.to_string(),
            "status": status,
        });
        // The binary's own diagnostics are what a client needs to fix a run.
        if let GatewayError::ExecutionFailed { stdout, stderr, exit_code } = &self.0 {
            body["stdout"] = json!(stdout);
            body["stderr"] = json!(stderr);
            body["exitCode"] = json!(exit_code);
        }
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            axum::Json(body),
        )
            .into_response()
    }
}

/// `?configFile=` naming an uploaded run config.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigQuery {
    pub config_file: Option<String>,
}

/// Parse a comma-separated list of integers, ignoring blank entries.
pub fn parse_number_list(raw: &str, param: &str) -> Result<Vec<i64>, GatewayError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| GatewayError::BadRequest(format!("{param}: {s:?} is not a number")))
        })
        .collect()
}

/// Required query parameter, or `BadRequest` naming it.
pub fn required<'a>(value: &'a Option<String>, param: &str) -> Result<&'a str, GatewayError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GatewayError::BadRequest(format!("{param} is required")))
}

