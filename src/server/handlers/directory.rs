use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::browser::{AvailablePaths, DEFAULT_SEARCH_DEPTH};
use crate::config::Deployment;
use crate::error::GatewayError;
use crate::server::AppState;
use crate::types::{DirectoryItem, DirectoryListing};

use super::{required, ApiError};

const DEFAULT_URL_TTL_MINUTES: u64 = 15;
/// Longest lifetime a GCS V4 signed URL may have (seven days).
const MAX_URL_TTL_MINUTES: u64 = 7 * 24 * 60;

/// `{ "success": true, "data": ... }` envelope used by the directory API.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

pub async fn list_directory(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Envelope<DirectoryListing>>, ApiError> {
    let path = query.path.as_deref().filter(|p| !p.is_empty());
    let listing = match state.store.deployment() {
        Deployment::Blob => state.store.list_directory(path).await?,
        Deployment::Local | Deployment::Mounted => state.browser.list(path).await?,
    };
    Ok(Envelope::ok(listing))
}

pub async fn directory_info(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Envelope<DirectoryItem>>, ApiError> {
    // The wildcard capture drops the leading slash.
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    Ok(Envelope::ok(state.browser.stat(&path).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub path: Option<String>,
    pub file_name: Option<String>,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub search_path: String,
    pub file_name: String,
    pub max_depth: usize,
    pub results: Vec<DirectoryItem>,
    pub total_found: usize,
}

pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Envelope<SearchResults>>, ApiError> {
    let pattern = required(&query.file_name, "fileName")?;
    let max_depth = query.max_depth.unwrap_or(DEFAULT_SEARCH_DEPTH);
    let path = query.path.as_deref().filter(|p| !p.is_empty());

    let start = state.browser.check(path)?;
    let results = state.browser.search(path, pattern, max_depth).await?;
    Ok(Envelope::ok(SearchResults {
        search_path: start.display().to_string(),
        file_name: pattern.to_string(),
        max_depth,
        total_found: results.len(),
        results,
    }))
}

pub async fn available_paths(
    State(state): State<AppState>,
) -> Json<Envelope<AvailablePaths>> {
    Envelope::ok(state.browser.available_paths())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlQuery {
    pub path: Option<String>,
    pub ttl_minutes: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrl {
    pub url: String,
    pub expires_in_minutes: u64,
}

pub async fn download_url(
    State(state): State<AppState>,
    Query(query): Query<DownloadUrlQuery>,
) -> Result<Json<Envelope<DownloadUrl>>, ApiError> {
    let path = required(&query.path, "path")?;
    let ttl = query.ttl_minutes.unwrap_or(DEFAULT_URL_TTL_MINUTES);
    if ttl == 0 || ttl > MAX_URL_TTL_MINUTES {
        return Err(GatewayError::BadRequest(format!(
            "ttlMinutes must be between 1 and {MAX_URL_TTL_MINUTES}"
        ))
        .into());
    }
    let url = state
        .store
        .signed_url(path, Duration::from_secs(ttl * 60))
        .await?;
    Ok(Envelope::ok(DownloadUrl {
        url: url.to_string(),
        expires_in_minutes: ttl,
    }))
}
