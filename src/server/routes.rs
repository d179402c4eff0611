use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{warn, Level};

use super::handlers::{dataset, directory, execution, health, metrics, outputs};
use super::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    let max_body = state.config.server.max_body_bytes;
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/", get(health::health_check))
        .route("/healthz", get(health::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        // Execution
        .route("/upload-file", post(execution::upload_file))
        .route("/execute/:filename", get(execution::execute))
        // Output files
        .route("/outputs/:filename/line/:line", get(outputs::read_output_line))
        .route("/output-file/:filename", get(outputs::output_file))
        .route("/count-file-lines", get(outputs::count_file_lines))
        // Dataset index
        .route(
            "/paginated-file-list-by-config/:config/page/:page",
            get(dataset::paginated_file_list),
        )
        .route("/file-input-name-by-index", get(dataset::file_input_name_by_index))
        .route(
            "/file-input-details-by-line-numbers",
            get(dataset::details_by_line_numbers),
        )
        .route("/line-by-image-name/:image_name", get(dataset::line_by_image_name))
        .route("/get-all-input-file-names", get(dataset::all_input_file_names))
        .route(
            "/grouped-input-class-names",
            get(dataset::grouped_class_names_by_query),
        )
        .route(
            "/grouped-input-class-names/:config",
            get(dataset::grouped_class_names),
        )
        .route("/input-file-details-by-name", get(dataset::details_by_name))
        .route("/image-file/:image_name", get(dataset::image_file))
        .route("/dynamic-paths/:config", get(dataset::dynamic_paths))
        .route("/clear-cache", post(dataset::clear_cache))
        // Directory browser
        .route("/api/directory/list", get(directory::list_directory))
        .route("/api/directory/info/*path", get(directory::directory_info))
        .route("/api/directory/search", get(directory::search_files))
        .route(
            "/api/directory/available-paths",
            get(directory::available_paths),
        )
        .route("/api/directory/download-url", get(directory::download_url))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
