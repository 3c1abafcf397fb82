//! Session authentication: encrypted cookie sessions, GitHub OAuth, and the
//! request middleware that resolves the caller's identity.

mod github;
mod session;

pub use github::auth_routes;
pub use session::{clear_session, read_session, session_cookie, state_cookie, SESSION_COOKIE};

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Key, PrivateCookieJar};
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, RedirectUrl, RefreshToken, TokenResponse, TokenUrl};
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use crate::api::{ApiError, AppState};
use crate::config::Settings;
use crate::models::{GithubUser, SessionData};

const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// Authentication state shared by the middleware and the auth routes.
#[derive(Clone)]
pub struct AuthState {
    pub cookie_key: Key,
    pub oauth: Option<Arc<BasicClient>>,
    pub frontend_url: String,
    pub secure_cookies: bool,
    pub http: reqwest::Client,
}

impl AuthState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        // The cookie key wants exactly 64 bytes; stretch whatever secret the
        // operator configured.
        let digest = Sha512::digest(settings.session_secret.as_bytes());
        let cookie_key = Key::from(digest.as_slice());

        let oauth = match (&settings.github_client_id, &settings.github_client_secret) {
            (Some(id), Some(secret)) => {
                let mut client = BasicClient::new(
                    ClientId::new(id.clone()),
                    Some(ClientSecret::new(secret.clone())),
                    AuthUrl::new(GITHUB_AUTH_URL.to_string())?,
                    Some(TokenUrl::new(GITHUB_TOKEN_URL.to_string())?),
                );
                if let Some(redirect) = &settings.github_redirect_url {
                    client = client.set_redirect_uri(RedirectUrl::new(redirect.clone())?);
                }
                Some(Arc::new(client))
            }
            _ => {
                warn!("GitHub OAuth is not configured; login is disabled");
                None
            }
        };

        Ok(Self {
            cookie_key,
            oauth,
            frontend_url: settings.frontend_url.clone(),
            secure_cookies: settings.environment == "production",
            http: reqwest::Client::new(),
        })
    }

    /// Refresh an expired upstream token. Concurrent refreshes race and the
    /// last writer wins; both writers carry valid tokens.
    pub async fn refresh(&self, session: &mut SessionData) -> anyhow::Result<()> {
        let oauth = self
            .oauth
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("oauth not configured"))?;
        let refresh_token = session
            .refresh_token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("session has no refresh token"))?;

        let token = oauth
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(async_http_client)
            .await?;

        session.access_token = token.access_token().secret().clone();
        if let Some(new_refresh) = token.refresh_token() {
            session.refresh_token = Some(new_refresh.secret().clone());
        }
        session.expires_at = token
            .expires_in()
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        Ok(())
    }
}

/// Identity of the authenticated caller, inserted by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub GithubUser);

impl CurrentUser {
    pub fn login(&self) -> &str {
        &self.0.login
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Unauthorized"))
    }
}

/// Resolve the session cookie into a [`CurrentUser`], refreshing the
/// upstream token in-line when it has expired. Refresh failure clears the
/// session and rejects the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(mut session) = read_session(&jar) else {
        return ApiError::unauthorized("Unauthorized").into_response();
    };

    let mut jar = jar;
    if session.is_expired() {
        match state.auth.refresh(&mut session).await {
            Ok(()) => {
                debug!(user = %session.user.login, "refreshed upstream token");
                jar = jar.add(session_cookie(&session, state.auth.secure_cookies));
            }
            Err(err) => {
                warn!(%err, "token refresh failed; clearing session");
                let jar = clear_session(jar);
                return (jar, ApiError::unauthorized("Token expired")).into_response();
            }
        }
    }

    request
        .extensions_mut()
        .insert(CurrentUser(session.user.clone()));
    let response = next.run(request).await;
    (jar, response).into_response()
}
