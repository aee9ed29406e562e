//! HTTP surface driven through the routers without a listener

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use auth_service::{
    AppState,
    audit::MemoryAuditLog,
    jwt::{JwtConfig, JwtService},
    metrics::Metrics,
    models::RoleName,
    notification::LogNotifier,
    password::{Argon2Hasher, HasherConfig},
    repositories::{InMemoryResetTokenRepository, InMemoryRoleRepository, InMemoryUserRepository},
    routes::{create_internal_router, create_router},
    service::{CredentialService, RegisterRequest, ServiceSettings, Stores},
    session::InMemorySessionRegistry,
    validation::PasswordPolicy,
};

const PASSWORD: &str = "Str0ng!Passw0rd";

fn state() -> AppState {
    let users = Arc::new(InMemoryUserRepository::new());
    let metrics = Arc::new(Metrics::new());
    let hasher = Argon2Hasher::new(&HasherConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap();

    let service = CredentialService::new(
        Stores {
            users: users.clone(),
            roles: Arc::new(InMemoryRoleRepository::new()),
            reset_tokens: Arc::new(InMemoryResetTokenRepository::new(users)),
            sessions: Arc::new(InMemorySessionRegistry::new()),
        },
        JwtService::new(JwtConfig {
            access_secret: "access-test-secret".into(),
            refresh_secret: "refresh-test-secret".into(),
            access_token_expiry: 900,
            refresh_token_expiry: 3600,
        }),
        Arc::new(hasher),
        Arc::new(LogNotifier),
        Arc::new(MemoryAuditLog::new()),
        metrics,
        ServiceSettings {
            policy: PasswordPolicy::default(),
            reset_token_ttl: Duration::minutes(15),
            max_bot_token: String::new(),
            max_default_role: RoleName::Operator,
        },
    );
    AppState { service }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn change_password_request(bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/auth/password/change")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = json!({ "current_password": PASSWORD, "new_password": "An0ther#Secret9" });
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn password_change_requires_a_bearer_token() {
    let app = create_router(state());

    let (status, body) = send(app.clone(), change_password_request(None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_bearer_token");
    assert_eq!(body["result"], Value::Null);

    let (status, body) = send(app, change_password_request(Some("not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "malformed_token");
}

#[tokio::test]
async fn password_change_with_a_valid_bearer_token() {
    let state = state();
    let session = state
        .service
        .register(RegisterRequest {
            email: Some("anna@example.com".into()),
            password: PASSWORD.into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let app = create_router(state);

    let request = change_password_request(Some(&session.tokens.access_token));
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["success"], true);
    assert_eq!(body["error"], Value::Null);
}

#[tokio::test]
async fn malformed_bodies_are_validation_failures() {
    let app = create_router(state());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\": "))
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "validation");

    let (status, body) = send(app, post_json("/login", &json!({ "email": "a@b.io" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn business_failures_answer_ok_with_their_class() {
    let app = create_router(state());
    let body = json!({ "email": "nobody@example.com", "password": PASSWORD });

    let (status, body) = send(app, post_json("/login", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "invalid_credentials");
}

#[tokio::test]
async fn administration_is_absent_from_the_public_router() {
    let app = create_router(state());
    let assign = json!({ "user_id": 1, "role": "super_admin" });

    for request in [
        post_json("/roles/assign", &assign),
        post_json("/roles/revoke", &json!({ "user_id": 1 })),
        post_json("/users", &json!({ "identifier": "eve@example.com" })),
        Request::get("/users/1").body(Body::empty()).unwrap(),
        Request::get("/users/1/permissions").body(Body::empty()).unwrap(),
    ] {
        let (status, _) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn internal_router_serves_administration() {
    let state = state();
    let created = state
        .service
        .create_user("anna@example.com", Some(PASSWORD), None)
        .await
        .unwrap();
    let app = create_internal_router(state);

    let assign = json!({
        "user_id": created.user_id,
        "role": "curator",
        "scope": { "unit": 3 },
    });
    let (status, body) = send(app.clone(), post_json("/roles/assign", &assign)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], Value::Null);

    let uri = format!("/users/{}/permissions", created.user_id);
    let (status, body) = send(app.clone(), Request::get(uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["role"], "curator");

    let (status, body) = send(app.clone(), Request::get("/users/abc").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "validation");

    let (status, _) = send(app, post_json("/register", &json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
