//! Shared runtime state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::fsops::Clipboard;
use crate::pty::PtyManager;
use crate::shutdown::IdleShutdown;

/// State shared across all runtime handlers.
pub struct RunnerState {
    /// Root every client path is confined to.
    pub workspace_root: PathBuf,
    /// Live PTY sessions.
    pub pty: Arc<PtyManager>,
    /// Pending cut/copy marker, cleared on paste.
    pub clipboard: Mutex<Option<Clipboard>>,
    /// Idle auto-shutdown manager.
    pub shutdown: IdleShutdown,
    /// Client for proxying requests to user apps.
    pub http_client: Client<HttpConnector, Body>,
}

impl RunnerState {
    pub fn new(workspace_root: PathBuf, shutdown: IdleShutdown) -> Arc<Self> {
        let http_client: Client<HttpConnector, Body> =
            Client::builder(TokioExecutor::new()).build_http();
        Arc::new(Self {
            pty: Arc::new(PtyManager::new(workspace_root.clone())),
            workspace_root,
            clipboard: Mutex::new(None),
            shutdown,
            http_client,
        })
    }
}
