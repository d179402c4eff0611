use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::error::GatewayError;
use crate::server::{file_component, AppState};

use super::ApiError;

const UPLOAD_FIELD: &str = "config_file";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub originalname: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub message: String,
    pub output: String,
    pub error: String,
}

/// Flips the cancellation flag when the request future is dropped.
struct CancelOnDrop(watch::Sender<bool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

#[instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let original = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::BadRequest("uploaded file has no name".into()))?;
        let filename = file_component(&original)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| GatewayError::BadRequest(format!("failed to read upload: {e}")))?;

        let uploads = &state.config.paths.uploads_dir;
        tokio::fs::create_dir_all(uploads)
            .await
            .map_err(GatewayError::from)?;
        let dest = uploads.join(&filename);
        tokio::fs::write(&dest, &data)
            .await
            .map_err(GatewayError::from)?;
        // A re-upload under the same name must not serve the old parse.
        state.cache.invalidate(Some(dest.as_path()));
        info!(file = %dest.display(), size = data.len(), "stored uploaded config");

        return Ok(Json(UploadResponse {
            message: "File uploaded successfully".into(),
            filename,
            originalname: original,
        }));
    }
    Err(GatewayError::BadRequest(format!("no file uploaded in field {UPLOAD_FIELD:?}")).into())
}

#[instrument(skip(state))]
pub async fn execute(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let config_path = state.config_path(&filename)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let _cancel = CancelOnDrop(cancel_tx);

    let driver = state.driver.clone();
    let output = tokio::spawn(async move { driver.execute(&config_path, Some(cancel_rx)).await })
        .await
        .map_err(|e| GatewayError::Internal(format!("execution task failed: {e}")))??;

    Ok(Json(ExecuteResponse {
        message: "Command executed successfully".into(),
        output: output.stdout,
        error: output.stderr,
    }))
}
