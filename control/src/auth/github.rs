//! GitHub OAuth login flow.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar};
use chrono::Utc;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthorizationCode, CsrfToken, Scope, TokenResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::api::{ApiError, AppState};
use crate::models::{GithubUser, SessionData};

use super::session::{
    clear_session, read_session, session_cookie, state_cookie, STATE_COOKIE,
};

const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";
const USER_AGENT: &str = "codepod-control";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/status", get(status))
}

/// GET /auth/github/login
async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Response, ApiError> {
    let oauth = state
        .auth
        .oauth
        .as_ref()
        .ok_or_else(|| ApiError::internal("GitHub OAuth is not configured"))?;

    let (auth_url, csrf) = oauth
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("read:user".to_string()))
        .add_scope(Scope::new("user:email".to_string()))
        .url();

    let jar = jar.add(state_cookie(csrf.secret(), state.auth.secure_cookies));
    Ok((jar, Redirect::temporary(auth_url.as_str())).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
}

/// GET /auth/github/callback
///
/// Failures redirect back to the frontend with an `error` query parameter
/// rather than rendering an API error.
async fn callback(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let frontend = state.auth.frontend_url.clone();
    let fail = |reason: &str| Redirect::temporary(&format!("{frontend}?error={reason}"));

    let Some(oauth) = state.auth.oauth.clone() else {
        return fail("oauth_unconfigured").into_response();
    };

    let saved_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    if saved_state.as_deref() != Some(params.state.as_str()) || params.state.is_empty() {
        warn!("oauth state mismatch");
        return fail("invalid_state").into_response();
    }

    let token = match oauth
        .exchange_code(AuthorizationCode::new(params.code))
        .request_async(async_http_client)
        .await
    {
        Ok(token) => token,
        Err(err) => {
            warn!(%err, "code exchange failed");
            return fail("exchange_failed").into_response();
        }
    };
    let access_token = token.access_token().secret().clone();

    let user: GithubUser = match state
        .auth
        .http
        .get(GITHUB_USER_URL)
        .bearer_auth(&access_token)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .and_then(|response| response.error_for_status())
    {
        Ok(response) => match response.json().await {
            Ok(user) => user,
            Err(err) => {
                warn!(%err, "failed to parse user profile");
                return fail("user_fetch_failed").into_response();
            }
        },
        Err(err) => {
            warn!(%err, "failed to fetch user profile");
            return fail("user_fetch_failed").into_response();
        }
    };

    // Primary email is best-effort; the profile may hide it.
    let mut user = user;
    if user.email.is_none() {
        if let Ok(response) = state
            .auth
            .http
            .get(GITHUB_EMAILS_URL)
            .bearer_auth(&access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
        {
            if let Ok(emails) = response.json::<Vec<GithubEmail>>().await {
                user.email = emails
                    .into_iter()
                    .find(|email| email.primary)
                    .map(|email| email.email);
            }
        }
    }

    let session = SessionData {
        user,
        access_token,
        refresh_token: token.refresh_token().map(|t| t.secret().clone()),
        expires_at: token
            .expires_in()
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl),
    };

    info!(user = %session.user.login, "login completed");
    let mut state_removal = Cookie::from(STATE_COOKIE);
    state_removal.set_path("/");
    let jar = jar
        .add(session_cookie(&session, state.auth.secure_cookies))
        .remove(state_removal);
    (jar, Redirect::temporary(&format!("{frontend}/dashboard"))).into_response()
}

/// POST /auth/github/logout
async fn logout(jar: PrivateCookieJar) -> Response {
    let jar = clear_session(jar);
    (jar, Json(json!({ "message": "Logged out successfully" }))).into_response()
}

/// GET /auth/github/me
async fn me(jar: PrivateCookieJar) -> Result<Json<GithubUser>, ApiError> {
    let session = read_session(&jar).ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
    Ok(Json(session.user))
}

/// GET /auth/github/status
async fn status(jar: PrivateCookieJar) -> Json<serde_json::Value> {
    match read_session(&jar) {
        Some(session) => Json(json!({
            "authenticated": true,
            "user": session.user,
            "token_expires_at": session.expires_at,
        })),
        None => Json(json!({ "authenticated": false })),
    }
}
