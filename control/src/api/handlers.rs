//! Repl API handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::models::Repl;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NewReplRequest {
    #[serde(rename = "replName")]
    pub repl_name: String,
    pub template: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl MessageResponse {
    fn success() -> Json<Self> {
        Json(Self { message: "Success" })
    }
}

/// GET /health
pub async fn health() -> Json<MessageResponse> {
    Json(MessageResponse { message: "ok" })
}

/// POST /api/repl/new
pub async fn create_repl(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<NewReplRequest>,
) -> ApiResult<Json<Repl>> {
    let repl = state
        .repls
        .create_repl(user.login(), &request.repl_name, &request.template)
        .await?;
    Ok(Json(repl))
}

/// GET /api/repl/
pub async fn list_repls(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Repl>>> {
    Ok(Json(state.repls.list_repls(user.login()).await?))
}

/// GET /api/repl/session/{id}
pub async fn activate_repl(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ActivateResponse>> {
    let repl = state.repls.activate(user.login(), &id).await?;
    Ok(Json(ActivateResponse {
        id: repl.id,
        name: repl.name,
    }))
}

/// DELETE /api/repl/session/{id}
pub async fn deactivate_repl(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.repls.deactivate(user.login(), &id).await?;
    Ok(MessageResponse::success())
}

/// DELETE /api/repl/{id}
pub async fn delete_repl(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.repls.delete(user.login(), &id).await?;
    Ok(MessageResponse::success())
}

/// DELETE /api/runner/{id}
///
/// Called by an idle runner for its own repl. Not session-authenticated;
/// reachable only inside the cluster network.
pub async fn runner_shutdown(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.repls.runner_shutdown(&id).await?;
    Ok(MessageResponse::success())
}
