//! Application state shared across handlers.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::auth::AuthState;
use crate::repl::ReplService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repl lifecycle orchestration.
    pub repls: Arc<ReplService>,
    /// Authentication state.
    pub auth: AuthState,
}

impl AppState {
    pub fn new(repls: ReplService, auth: AuthState) -> Self {
        Self {
            repls: Arc::new(repls),
            auth,
        }
    }
}

/// Lets the private cookie jar extract its encryption key from the state.
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Key {
        state.auth.cookie_key.clone()
    }
}
