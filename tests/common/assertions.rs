use std::fmt::Debug;

use reqwest::Response;
use serde_json::Value;

use udlf_gateway::error::{GatewayError, Result};

pub fn assert_not_found<T: Debug>(result: Result<T>) {
    match result {
        Err(GatewayError::NotFound { .. }) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

pub fn assert_bad_request<T: Debug>(result: Result<T>) {
    match result {
        Err(GatewayError::BadRequest(_)) => {}
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

pub fn assert_permission_denied<T: Debug>(result: Result<T>) {
    match result {
        Err(GatewayError::PermissionDenied { .. }) => {}
        other => panic!("expected PermissionDenied, got {other:?}"),
    }
}

/// Assert an error response with `status` and the JSON error body shape.
pub async fn assert_error_response(resp: Response, status: u16) -> Value {
    assert_eq!(resp.status().as_u16(), status, "unexpected status");
    let body: Value = resp.json().await.expect("error body should be JSON");
    assert_eq!(body["status"], status, "body status should match");
    assert!(
        body["error"].as_str().is_some_and(|e| !e.is_empty()),
        "error message should be present: {body}"
    );
    body
}
