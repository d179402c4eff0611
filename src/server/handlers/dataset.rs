//! Dataset lookups resolved through the cached index of a run config.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{ClassGroups, DatasetIndex};
use crate::error::{GatewayError, Result};
use crate::run_config::DatasetPaths;
use crate::server::{file_component, AppState};
use crate::types::{FileDetail, Page, PageItem};

use super::{parse_number_list, required, ApiError, ConfigQuery};

async fn index_for(state: &AppState, config: Option<PathBuf>) -> Result<Arc<DatasetIndex>> {
    state.cache.index(&state.store, config.as_deref()).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page_size: Option<String>,
}

pub async fn paginated_file_list(
    State(state): State<AppState>,
    Path((config, page)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> std::result::Result<Json<Page>, ApiError> {
    let page: usize = page
        .parse()
        .map_err(|_| GatewayError::BadRequest(format!("invalid page number: {page:?}")))?;
    let server = &state.config.server;
    let page_size = match query.page_size.as_deref() {
        None | Some("") => server.default_page_size,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| GatewayError::BadRequest(format!("invalid pageSize: {raw:?}")))?,
    };
    if page_size > server.max_page_size {
        return Err(GatewayError::BadRequest(format!(
            "pageSize {page_size} exceeds the maximum of {}",
            server.max_page_size
        ))
        .into());
    }

    let index = index_for(&state, Some(state.config_path(&config)?)).await?;
    Ok(Json(index.list_page(page, page_size)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexListQuery {
    pub index_list: Option<String>,
    pub config_file: Option<String>,
}

/// Resolve the 0-based indices printed by the binary to list entries.
pub async fn file_input_name_by_index(
    State(state): State<AppState>,
    Query(query): Query<IndexListQuery>,
) -> std::result::Result<Json<Vec<PageItem>>, ApiError> {
    let raw = required(&query.index_list, "indexList")?;
    let ordinals: Vec<i64> = parse_number_list(raw, "indexList")?
        .into_iter()
        .map(|idx| idx.saturating_add(1))
        .collect();

    let config = state.optional_config_path(query.config_file.as_deref())?;
    let index = index_for(&state, config).await?;
    Ok(Json(index.resolve_by_ordinals(&ordinals)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineNumbersQuery {
    pub line_numbers: Option<String>,
    pub config_file: Option<String>,
}

pub async fn details_by_line_numbers(
    State(state): State<AppState>,
    Query(query): Query<LineNumbersQuery>,
) -> std::result::Result<Json<BTreeMap<String, FileDetail>>, ApiError> {
    let raw = required(&query.line_numbers, "lineNumbers")?;
    let ordinals = parse_number_list(raw, "lineNumbers")?;

    let config = state.optional_config_path(query.config_file.as_deref())?;
    let index = index_for(&state, config).await?;
    Ok(Json(index.details_for_ordinals(&ordinals)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineByNameResponse {
    pub image_name: String,
    pub line_number: usize,
}

pub async fn line_by_image_name(
    State(state): State<AppState>,
    Path(image_name): Path<String>,
    Query(query): Query<ConfigQuery>,
) -> std::result::Result<Json<LineByNameResponse>, ApiError> {
    let config = state.optional_config_path(query.config_file.as_deref())?;
    let index = index_for(&state, config).await?;
    let line_number = index.get_ordinal_for(&image_name)?;
    Ok(Json(LineByNameResponse {
        image_name,
        line_number,
    }))
}

pub async fn all_input_file_names(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> std::result::Result<Json<Vec<String>>, ApiError> {
    let config = state.optional_config_path(query.config_file.as_deref())?;
    let index = index_for(&state, config).await?;
    Ok(Json(index.filenames().to_vec()))
}

pub async fn grouped_class_names(
    State(state): State<AppState>,
    Path(config): Path<String>,
) -> std::result::Result<Json<ClassGroups>, ApiError> {
    let index = index_for(&state, Some(state.config_path(&config)?)).await?;
    Ok(Json(index.filenames_grouped_by_class().clone()))
}

pub async fn grouped_class_names_by_query(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> std::result::Result<Json<ClassGroups>, ApiError> {
    let config = state.optional_config_path(query.config_file.as_deref())?;
    let index = index_for(&state, config).await?;
    Ok(Json(index.filenames_grouped_by_class().clone()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsByNameQuery {
    pub config_file: Option<String>,
    pub names: Option<String>,
}

pub async fn details_by_name(
    State(state): State<AppState>,
    Query(query): Query<DetailsByNameQuery>,
) -> std::result::Result<Json<BTreeMap<String, FileDetail>>, ApiError> {
    let config = state.optional_config_path(query.config_file.as_deref())?;
    let index = index_for(&state, config).await?;
    let details = match query.names.as_deref() {
        Some(names) if !names.trim().is_empty() => {
            let names: Vec<&str> = names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .collect();
            index.details_for_filenames(&names)
        }
        _ => index.all_details(),
    };
    Ok(Json(details))
}

fn content_type_for(name: &str) -> &'static str {
    let ext = std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("bmp") => "image/bmp",
        Some("ppm") => "image/x-portable-pixmap",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

pub async fn image_file(
    State(state): State<AppState>,
    Path(image_name): Path<String>,
    Query(query): Query<ConfigQuery>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let config = required(&query.config_file, "configFile")?;
    let config = state.config_path(config)?;
    let paths = state.cache.dataset_paths(Some(config.as_path())).await?;
    if paths.images_dir.is_empty() {
        return Err(GatewayError::not_found("INPUT_IMAGES_PATH is not set in the config").into());
    }

    let image_name = file_component(&image_name)?;
    let location = format!("{}/{}", paths.images_dir.trim_end_matches('/'), image_name);
    let data = state.store.read(&location).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&image_name))], data))
}

#[derive(Debug, Serialize)]
pub struct DatasetPathsResponse {
    pub success: bool,
    pub data: DatasetPaths,
}

pub async fn dynamic_paths(
    State(state): State<AppState>,
    Path(config): Path<String>,
) -> std::result::Result<Json<DatasetPathsResponse>, ApiError> {
    let config = state.config_path(&config)?;
    let data = state.cache.dataset_paths(Some(config.as_path())).await?;
    Ok(Json(DatasetPathsResponse {
        success: true,
        data,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheRequest {
    pub config_file_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file_path: Option<String>,
    pub removed: usize,
}

pub async fn clear_cache(
    State(state): State<AppState>,
    body: Option<Json<ClearCacheRequest>>,
) -> std::result::Result<Json<ClearCacheResponse>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let config = state.optional_config_path(req.config_file_name.as_deref())?;

    let response = match config {
        Some(path) => ClearCacheResponse {
            message: "Cache cleared for config file".into(),
            removed: state.cache.invalidate(Some(path.as_path())),
            config_file_path: Some(path.display().to_string()),
        },
        None => {
            let blobs = state.store.clear_read_cache();
            info!(blobs, "cleared blob read cache");
            ClearCacheResponse {
                message: "All caches cleared".into(),
                removed: state.cache.invalidate(None) + blobs,
                config_file_path: None,
            }
        }
    };
    Ok(Json(response))
}

