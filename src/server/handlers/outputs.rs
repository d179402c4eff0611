use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::lines::{count_non_empty_lines, read_line};
use crate::server::AppState;

use super::{required, ApiError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineResponse {
    pub line: u64,
    pub line_content: String,
}

pub async fn read_output_line(
    State(state): State<AppState>,
    Path((filename, line)): Path<(String, String)>,
) -> Result<Json<LineResponse>, ApiError> {
    let line: u64 = line
        .parse()
        .ok()
        .filter(|&n| n >= 1)
        .ok_or_else(|| GatewayError::BadRequest(format!("invalid line number: {line:?}")))?;
    let path = state.output_path(&filename)?;

    let content = read_line(&path, line).await?.ok_or_else(|| {
        GatewayError::not_found(format!("line {line} in {filename}"))
    })?;

    Ok(Json(LineResponse {
        line,
        line_content: content,
    }))
}

pub async fn output_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.output_path(&filename)?;
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GatewayError::not_found(format!("output file {filename}")).into())
        }
        Err(e) => return Err(GatewayError::from(e).into()),
    };
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], data))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountLinesQuery {
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountLinesResponse {
    pub file_path: String,
    pub line_count: u64,
}

pub async fn count_file_lines(
    State(state): State<AppState>,
    Query(query): Query<CountLinesQuery>,
) -> Result<Json<CountLinesResponse>, ApiError> {
    let requested = required(&query.file_path, "filePath")?;
    let path = state.browser.check(Some(requested))?;
    let line_count = count_non_empty_lines(&path).await?;
    Ok(Json(CountLinesResponse {
        file_path: path.display().to_string(),
        line_count,
    }))
}
