//! API route definitions.

use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{auth_middleware, auth_routes};

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let cors = build_cors_layer(&state);

    // Repl routes require an authenticated session.
    let protected_routes = Router::new()
        .route("/api/repl/new", post(handlers::create_repl))
        .route("/api/repl/", get(handlers::list_repls))
        .route(
            "/api/repl/session/{id}",
            get(handlers::activate_repl).delete(handlers::deactivate_repl),
        )
        .route("/api/repl/{id}", delete(handlers::delete_repl))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Runner self-shutdown is authorized by network policy, and the auth
    // flow itself must be reachable without a session.
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/runner/{id}", delete(handlers::runner_shutdown))
        .nest("/auth/github", auth_routes())
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(trace_layer)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = Vec::new();
    if let Ok(origin) = state.auth.frontend_url.parse::<HeaderValue>() {
        origins.push(origin);
    }
    for origin in ["http://localhost:3000", "http://127.0.0.1:3000"] {
        if let Ok(value) = origin.parse::<HeaderValue>() {
            if !origins.contains(&value) {
                origins.push(value);
            }
        }
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::COOKIE])
        .allow_credentials(true)
}
