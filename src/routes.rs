use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, RequestError};
use crate::types::{ErrorResponse, HealthResponse};
use crate::validator::validate;

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub max_body_bytes: usize,
}

/// /verify — Verify a proof with the external engine.
///
/// Request body: `{ proof, publicInputs }` (both present and truthy)
/// Response: the engine's JSON result, verbatim
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    body: Bytes,
) -> Response {
    let request = match validate(&method, &body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejected {} /verify: {}", method, e.kind());
            return request_error_response(e);
        }
    };

    tracing::info!("Verify request accepted, dispatching to verifier");

    match state.dispatcher.dispatch(request).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            tracing::warn!("Verification failed ({}): {}", e.kind(), e);
            dispatch_error_response(e)
        }
    }
}

fn request_error_response(error: RequestError) -> Response {
    let body = Json(ErrorResponse::new(error.to_string()));
    match error {
        RequestError::MethodNotAllowed => (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "POST")],
            body,
        )
            .into_response(),
        RequestError::BadRequest => (StatusCode::BAD_REQUEST, body).into_response(),
    }
}

fn dispatch_error_response(error: DispatchError) -> Response {
    let detail = error.detail();
    let (status, body) = match error {
        DispatchError::MalformedOutput { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::with_output("Failed to parse verifier output", detail),
        ),
        DispatchError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            ErrorResponse::with_details("Verifier timed out", detail),
        ),
        DispatchError::Spawn { .. }
        | DispatchError::EngineFailure { .. }
        | DispatchError::Io(_)
        | DispatchError::Encode(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::with_details("Verifier failed", detail),
        ),
    };
    (status, Json(body)).into_response()
}

/// GET /health — Health check endpoint.
///
/// Response: HealthResponse { status: "ok", engine: "<command line>" }
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            engine: state.dispatcher.config().display_command(),
        }),
    )
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{any, get};
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/verify", any(verify_handler))
        .route("/api/verify", any(verify_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
