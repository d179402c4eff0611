use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "UDLF server is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
