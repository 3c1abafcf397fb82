//! Core domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-owned workspace: a metadata record, an object-storage prefix and,
/// while active, a cluster workload+service+ingress named after `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repl {
    pub id: String,
    pub name: String,
    pub user: String,
    pub template: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

/// Identity resolved from the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GithubUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Serialized into the encrypted session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub user: GithubUser,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionData {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Utc::now() > expiry,
            None => false,
        }
    }
}

/// Validate a string for use as a DNS label, URL path segment, and
/// object-storage key segment.
pub fn validate_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repl_serializes_is_active_in_camel_case() {
        let repl = Repl {
            id: "repl-1234".to_string(),
            name: "demo".to_string(),
            user: "alice".to_string(),
            template: "node".to_string(),
            is_active: true,
        };
        let json = serde_json::to_value(&repl).unwrap();
        assert_eq!(json["isActive"], true);
    }

    #[test]
    fn label_validation() {
        assert!(validate_label("repl-3f9d2c1a-1b2c-4d5e-8f90-abcdef012345"));
        assert!(validate_label("alice"));
        assert!(!validate_label(""));
        assert!(!validate_label("Alice"));
        assert!(!validate_label("has space"));
        assert!(!validate_label("dot.dot"));
        assert!(!validate_label(&"a".repeat(64)));
    }

    #[test]
    fn session_without_expiry_never_expires() {
        let session = SessionData {
            user: GithubUser {
                id: 1,
                login: "alice".to_string(),
                name: None,
                email: None,
                avatar_url: None,
            },
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
        };
        assert!(!session.is_expired());
    }
}
