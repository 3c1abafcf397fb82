//! Environment-driven settings.
//!
//! Every value comes from the environment; secrets fall back to
//! `/run/secrets/<NAME>` when the variable is unset.

use std::env;
use std::path::Path;

/// Read `name` from the environment, falling back to `/run/secrets/<name>`.
pub fn env_or_secret(name: &str) -> Option<String> {
    if let Ok(value) = env::var(name) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    let secret_path = Path::new("/run/secrets").join(name);
    std::fs::read_to_string(secret_path)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_or_secret(name).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub frontend_url: String,
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
    pub github_redirect_url: Option<String>,
    pub session_secret: String,
    pub environment: String,
    pub redis_url: String,
    pub spaces_access_key: String,
    pub spaces_secret_key: String,
    pub spaces_region: String,
    pub spaces_bucket: String,
    pub spaces_endpoint: String,
    pub kube_config_path: Option<String>,
    pub runner_cluster_ip: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000"),
            github_client_id: env_or_secret("GITHUB_CLIENT_ID"),
            github_client_secret: env_or_secret("GITHUB_CLIENT_SECRET"),
            github_redirect_url: env_or_secret("GITHUB_REDIRECT_URL"),
            session_secret: env_or("SESSION_SECRET", "dont-use-this-in-prod"),
            environment: env_or("ENVIRONMENT", "development"),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            spaces_access_key: env_or("SPACES_ACCESS_KEY", ""),
            spaces_secret_key: env_or("SPACES_SECRET_KEY", ""),
            spaces_region: env_or("SPACES_REGION", "blr1"),
            spaces_bucket: env_or("SPACES_BUCKET", "codepod"),
            spaces_endpoint: env_or("SPACES_ENDPOINT", "https://blr1.digitaloceanspaces.com"),
            kube_config_path: env_or_secret("KUBE_CONFIG_PATH"),
            runner_cluster_ip: env_or("RUNNER_CLUSTER_IP", "localhost"),
        }
    }

    /// Base URL the activation probe reaches runners on.
    pub fn runner_base_url(&self) -> String {
        format!("https://{}", self.runner_cluster_ip)
    }
}
