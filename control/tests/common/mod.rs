//! Test utilities and common setup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::PrivateCookieJar;

use codepod_control::api::{self, AppState};
use codepod_control::auth::{session_cookie, AuthState};
use codepod_control::cluster::{ClusterBackend, ClusterResult};
use codepod_control::config::Settings;
use codepod_control::models::{GithubUser, SessionData};
use codepod_control::repl::{ReplConfig, ReplService};
use codepod_control::storage::{MemoryStorage, ObjectStorage};
use codepod_control::store::{MemoryStore, MetadataStore};
use codepod_control::templates::TemplateConfig;

/// Cluster backend that accepts every request without touching a cluster.
struct NullCluster;

#[async_trait]
impl ClusterBackend for NullCluster {
    async fn create_repl_resources(
        &self,
        _owner: &str,
        _id: &str,
        _template: &str,
        _config: &TemplateConfig,
    ) -> ClusterResult<()> {
        Ok(())
    }

    async fn delete_repl_resources(&self, _id: &str) -> ClusterResult<()> {
        Ok(())
    }

    async fn snapshot_workspace(&self, _owner: &str, _id: &str) -> ClusterResult<()> {
        Ok(())
    }
}

fn test_settings() -> Settings {
    Settings {
        frontend_url: "http://localhost:3000".to_string(),
        github_client_id: None,
        github_client_secret: None,
        github_redirect_url: None,
        session_secret: "integration-test-secret".to_string(),
        environment: "test".to_string(),
        redis_url: String::new(),
        spaces_access_key: String::new(),
        spaces_secret_key: String::new(),
        spaces_region: String::new(),
        spaces_bucket: "codepod".to_string(),
        spaces_endpoint: String::new(),
        kube_config_path: None,
        runner_cluster_ip: "localhost".to_string(),
    }
}

/// Serve `GET /{id}/ping` the way a healthy runner ingress would.
async fn spawn_pong_server() -> String {
    let app = Router::new().route(
        "/{id}/ping",
        get(|| async { ([(header::CONTENT_TYPE, "application/json")], "\"pong\"\n") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Create a test application over in-memory backends, with a local stand-in
/// for the runner ingress so activation probes succeed.
pub async fn test_app() -> (Router, AuthState) {
    let settings = test_settings();
    let auth = AuthState::new(&settings).unwrap();

    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryStorage::new());
    storage.put("templates/node/index.js", b"console.log('hi')");
    storage.put("templates/python/main.py", b"print('hi')");

    let repls = ReplService::new(
        store as Arc<dyn MetadataStore>,
        storage as Arc<dyn ObjectStorage>,
        Arc::new(NullCluster) as Arc<dyn ClusterBackend>,
        ReplConfig {
            max_repls_per_owner: 2,
            runner_base_url: spawn_pong_server().await,
            probe_interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(500),
        },
    );

    let state = AppState::new(repls, auth.clone());
    (api::create_router(state), auth)
}

/// `Cookie` header value carrying an encrypted session for `login`.
pub fn session_for(auth: &AuthState, login: &str) -> String {
    let session = SessionData {
        user: GithubUser {
            id: 1,
            login: login.to_string(),
            name: None,
            email: None,
            avatar_url: None,
        },
        access_token: "test-token".to_string(),
        refresh_token: None,
        expires_at: None,
    };

    let jar =
        PrivateCookieJar::new(auth.cookie_key.clone()).add(session_cookie(&session, false));
    let response = (jar, ()).into_response();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("jar should set the session cookie")
        .to_str()
        .unwrap();
    set_cookie
        .split(';')
        .next()
        .unwrap()
        .trim()
        .to_string()
}
