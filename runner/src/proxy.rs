//! Reverse proxy for user-launched apps.
//!
//! `/user-app/<port>/<rest>` forwards to `http://127.0.0.1:<port>/<rest>`.
//! Only unprivileged ports are reachable.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode, Uri};
use axum::response::Response;
use tracing::{debug, error};

use crate::state::RunnerState;

/// ANY /user-app/{port}/{*rest}
pub async fn user_app_proxy(
    State(state): State<Arc<RunnerState>>,
    Path((port, rest)): Path<(String, String)>,
    req: Request<Body>,
) -> Result<Response, StatusCode> {
    forward(state, &port, &rest, req).await
}

/// ANY /user-app/{port}
pub async fn user_app_proxy_root(
    State(state): State<Arc<RunnerState>>,
    Path(port): Path<String>,
    req: Request<Body>,
) -> Result<Response, StatusCode> {
    forward(state, &port, "", req).await
}

async fn forward(
    state: Arc<RunnerState>,
    port: &str,
    rest: &str,
    mut req: Request<Body>,
) -> Result<Response, StatusCode> {
    let port: u16 = port.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    if port < 1024 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let query = req.uri().query().unwrap_or("");
    let mut target = format!("http://127.0.0.1:{}/{}", port, rest);
    if !query.is_empty() {
        target.push('?');
        target.push_str(query);
    }

    debug!(%target, "proxying user-app request");

    let uri: Uri = target.parse().map_err(|err| {
        error!(%target, ?err, "invalid proxy target");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    *req.uri_mut() = uri;

    if let Some(authority) = req.uri().authority() {
        let host = authority
            .as_str()
            .parse()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        req.headers_mut().insert(header::HOST, host);
    }

    let response = state.http_client.request(req).await.map_err(|err| {
        debug!(?err, "user app unreachable");
        StatusCode::BAD_GATEWAY
    })?;

    Ok(response.map(Body::new))
}
