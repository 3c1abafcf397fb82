//! Encrypted cookie session helpers.
//!
//! The session blob is opaque to everything else: a JSON-serialized
//! [`SessionData`] inside a private (encrypted, authenticated) cookie.

use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use time::Duration;
use tracing::warn;

use crate::models::SessionData;

pub const SESSION_COOKIE: &str = "codepod_session";
pub const STATE_COOKIE: &str = "oauth_state";

const SESSION_MAX_AGE_DAYS: i64 = 7;
const STATE_MAX_AGE_SECS: i64 = 600;

pub fn session_cookie(session: &SessionData, secure: bool) -> Cookie<'static> {
    let value = serde_json::to_string(session).unwrap_or_default();
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(SESSION_MAX_AGE_DAYS))
        .build()
}

/// Short-lived CSRF state slot used only across the OAuth callback.
pub fn state_cookie(state: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, state.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(STATE_MAX_AGE_SECS))
        .build()
}

pub fn read_session(jar: &PrivateCookieJar) -> Option<SessionData> {
    let cookie = jar.get(SESSION_COOKIE)?;
    match serde_json::from_str(cookie.value()) {
        Ok(session) => Some(session),
        Err(err) => {
            warn!(%err, "discarding unreadable session cookie");
            None
        }
    }
}

pub fn clear_session(jar: PrivateCookieJar) -> PrivateCookieJar {
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    jar.remove(cookie)
}
