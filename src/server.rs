//! HTTP surface of the query service.

use crate::normalizer::Document;
use crate::search::{SearchError, SearchService};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Router options that do not affect search semantics.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Directory served for every path other than the API routes.
    pub static_dir: Option<PathBuf>,
    /// Origins allowed by CORS; empty disables the CORS layer.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    query: Option<String>,
    q: Option<String>,
}

impl SearchParams {
    fn text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .or(self.q.as_deref())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// Builds the application router around a shared [`SearchService`].
pub fn router(service: SearchService, config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(healthz))
        .route("/search", get(search_handler))
        .with_state(service);

    if let Some(dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    if let Some(cors) = cors_layer(&config.cors_origins) {
        app = app.layer(cors);
    }
    app.layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET]),
    )
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn search_handler(
    State(service): State<SearchService>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Document>>, ApiError> {
    match service.handle_search(params.text()).await {
        Ok(documents) => Ok(Json(documents)),
        Err(SearchError::MissingQuery) => Err(bad_request("query parameter is required")),
        Err(err @ SearchError::Backend(_)) => {
            error!(error = %err, "search failed");
            Err(internal_error())
        }
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: "search is temporarily unavailable".to_string(),
        }),
    )
}
