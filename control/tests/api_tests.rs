//! API integration tests.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::{session_for, test_app};

fn request(method: Method, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&value).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Health endpoint works without authentication.
#[tokio::test]
async fn test_health_endpoint() {
    let (app, _auth) = test_app().await;

    let response = app
        .oneshot(request(Method::GET, "/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "ok");
}

/// Repl routes reject requests without a session cookie.
#[tokio::test]
async fn test_repl_routes_require_a_session() {
    let (app, _auth) = test_app().await;

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/repl/", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/repl/new",
            None,
            Some(json!({ "replName": "demo", "template": "node" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Create a repl and see it in the caller's listing.
#[tokio::test]
async fn test_create_and_list_repls() {
    let (app, auth) = test_app().await;
    let cookie = session_for(&auth, "alice");

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/repl/new",
            Some(&cookie),
            Some(json!({ "replName": "demo", "template": "node" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    assert!(created["id"].as_str().unwrap().starts_with("repl-"));
    assert_eq!(created["name"], "demo");
    assert_eq!(created["user"], "alice");
    assert_eq!(created["isActive"], false);

    let response = app
        .oneshot(request(Method::GET, "/api/repl/", Some(&cookie), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listing = body_json(response).await;
    assert_eq!(listing.as_array().unwrap().len(), 1);
    assert_eq!(listing[0]["id"], created["id"]);
}

/// An unknown template is a bad request, not a server error.
#[tokio::test]
async fn test_unknown_template_is_a_bad_request() {
    let (app, auth) = test_app().await;
    let cookie = session_for(&auth, "alice");

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/repl/new",
            Some(&cookie),
            Some(json!({ "replName": "demo", "template": "ruby" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

/// The third create for one account hits the quota and maps to 429.
#[tokio::test]
async fn test_quota_limit_maps_to_429() {
    let (app, auth) = test_app().await;
    let cookie = session_for(&auth, "alice");

    for name in ["one", "two"] {
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/repl/new",
                Some(&cookie),
                Some(json!({ "replName": name, "template": "node" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/repl/new",
            Some(&cookie),
            Some(json!({ "replName": "three", "template": "node" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = body_json(response).await;
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("Free Account Limit Reached"));
}

/// A caller who does not own the repl gets 403 and nothing changes.
#[tokio::test]
async fn test_non_owner_access_is_forbidden() {
    let (app, auth) = test_app().await;
    let alice = session_for(&auth, "alice");
    let bob = session_for(&auth, "bob");

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/repl/new",
            Some(&alice),
            Some(json!({ "replName": "demo", "template": "node" })),
        ))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            Method::DELETE,
            &format!("/api/repl/{id}"),
            Some(&bob),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("This User doesn't have access to this Repl"));

    // Alice still sees her repl.
    let response = app
        .oneshot(request(Method::GET, "/api/repl/", Some(&alice), None))
        .await
        .unwrap();
    let listing = body_json(response).await;
    assert_eq!(listing.as_array().unwrap().len(), 1);
}

/// Full lifecycle over HTTP: create, activate, deactivate, delete.
#[tokio::test]
async fn test_activate_deactivate_delete_lifecycle() {
    let (app, auth) = test_app().await;
    let cookie = session_for(&auth, "alice");

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/repl/new",
            Some(&cookie),
            Some(json!({ "replName": "demo", "template": "node" })),
        ))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/api/repl/session/{id}"),
            Some(&cookie),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let activated = body_json(response).await;
    assert_eq!(activated["id"], id.as_str());
    assert_eq!(activated["name"], "demo");

    // A second activation conflicts.
    let response = app
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/api/repl/session/{id}"),
            Some(&cookie),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(request(
            Method::DELETE,
            &format!("/api/repl/session/{id}"),
            Some(&cookie),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(
            Method::DELETE,
            &format!("/api/repl/{id}"),
            Some(&cookie),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request(Method::GET, "/api/repl/", Some(&cookie), None))
        .await
        .unwrap();
    let listing = body_json(response).await;
    assert!(listing.as_array().unwrap().is_empty());
}

/// Unknown repl ids resolve to 404 for the owner-scoped routes.
#[tokio::test]
async fn test_unknown_repl_is_not_found() {
    let (app, auth) = test_app().await;
    let cookie = session_for(&auth, "alice");

    let response = app
        .oneshot(request(
            Method::GET,
            "/api/repl/session/repl-00000000-0000-4000-8000-000000000000",
            Some(&cookie),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// The runner self-shutdown endpoint is reachable without a session; it is
/// gated by network policy, not by auth.
#[tokio::test]
async fn test_runner_shutdown_is_not_session_gated() {
    let (app, _auth) = test_app().await;

    let response = app
        .oneshot(request(
            Method::DELETE,
            "/api/runner/repl-00000000-0000-4000-8000-000000000000",
            None,
            None,
        ))
        .await
        .unwrap();
    // Unknown id: the route answered (no 401), the lookup failed.
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
