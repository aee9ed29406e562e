//! HTTP JSON surface of the credential service
//!
//! Every body is `{ "result": ..., "error": ... }`. Business failures are
//! answered with 200 and the error class in `error`; infrastructure faults
//! with a 5xx and a generic message.
//!
//! User and role administration lives on a separate router bound to the
//! internal address, so the public listener never exposes it.

use axum::{
    Extension, Json, Router,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    AppState,
    error::{AuthError, AuthResult},
    middleware::require_bearer,
    models::{RoleName, Scope, UserId},
    service::{RegisterRequest, TokenInfo},
};

/// Response envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Outcome of an operation, rendered as an [`Envelope`]
pub struct Rpc<T>(pub AuthResult<T>);

impl<T: Serialize> IntoResponse for Rpc<T> {
    fn into_response(self) -> Response {
        match self.0 {
            Ok(result) => (
                StatusCode::OK,
                Json(Envelope {
                    result: Some(result),
                    error: None,
                }),
            )
                .into_response(),
            Err(e) if e.is_infrastructure() => {
                error!("Request failed: {}", e);
                let status = match e {
                    AuthError::TransientInfra(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, Json(Envelope::<T>::error("Internal server error"))).into_response()
            }
            Err(e) => (StatusCode::OK, Json(Envelope::<T>::error(e.kind()))).into_response(),
        }
    }
}

/// Unwrap a JSON body, turning a malformed one into a validation failure
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AuthResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AuthError::Validation(rejection.body_text()))
}

fn user_id(path: Result<Path<UserId>, PathRejection>) -> AuthResult<UserId> {
    path.map(|Path(id)| id)
        .map_err(|rejection| AuthError::Validation(rejection.body_text()))
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Acknowledged {
    pub success: bool,
}

const ACK: Acknowledged = Acknowledged { success: true };

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct PhoneLoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct MaxAuthRequest {
    pub init_data: String,
}

#[derive(Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub identifier: String,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: UserId,
    pub role: String,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Deserialize)]
pub struct RevokeRolesRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct RevokedRoles {
    pub grants_removed: u64,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub identifier: String,
}

#[derive(Deserialize)]
pub struct ResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Create the public router for the credential service
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/password/change", post(change_password))
        .route_layer(from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/login-phone", post(login_phone))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/auth/max", post(authenticate_max))
        .route("/validate-token", post(validate_token))
        .route("/auth/password-reset/request", post(request_password_reset))
        .route("/auth/password-reset/confirm", post(confirm_password_reset))
        .merge(protected)
        .with_state(state)
}

/// Create the router for user and role administration
///
/// Carries no authentication of its own; it is served on the internal
/// listener only and must not be reachable from outside the deployment.
pub fn create_internal_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/permissions", get(get_user_permissions))
        .route("/roles/assign", post(assign_role))
        .route("/roles/revoke", post(revoke_roles))
        .route("/validate-token", post(validate_token))
        .with_state(state)
}

/// Health check endpoint; 503 when a store is unreachable
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.service.health().await;
    let (status, error) = if report.is_healthy() {
        (StatusCode::OK, None)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Some("unhealthy".to_string()))
    };
    (
        status,
        Json(Envelope {
            result: Some(report),
            error,
        }),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Rpc(Ok(state.service.metrics()))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> impl IntoResponse {
    info!("Registration request");
    let result = match body(payload) {
        Ok(request) => state.service.register(request).await,
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => state.service.login(&request.email, &request.password).await,
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn login_phone(
    State(state): State<AppState>,
    payload: Result<Json<PhoneLoginRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => {
            state
                .service
                .login_by_phone(&request.phone, &request.password)
                .await
        }
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => state.service.refresh(&request.refresh_token).await,
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn logout(
    State(state): State<AppState>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> impl IntoResponse {
    info!("Logout request");
    let result = match body(payload) {
        Ok(request) => state.service.logout(&request.refresh_token).await,
        Err(e) => Err(e),
    };
    Rpc(result.map(|()| ACK))
}

pub async fn authenticate_max(
    State(state): State<AppState>,
    payload: Result<Json<MaxAuthRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => state.service.authenticate_max(&request.init_data).await,
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn validate_token(
    State(state): State<AppState>,
    payload: Result<Json<ValidateTokenRequest>, JsonRejection>,
) -> impl IntoResponse {
    Rpc(body(payload).and_then(|request| state.service.validate_token(&request.token)))
}

pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => {
            state
                .service
                .create_user(
                    &request.identifier,
                    request.password.as_deref(),
                    request.role.as_deref(),
                )
                .await
        }
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn get_user(
    State(state): State<AppState>,
    path: Result<Path<UserId>, PathRejection>,
) -> impl IntoResponse {
    let result = match user_id(path) {
        Ok(id) => state.service.get_user(id).await,
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn get_user_permissions(
    State(state): State<AppState>,
    path: Result<Path<UserId>, PathRejection>,
) -> impl IntoResponse {
    let result = match user_id(path) {
        Ok(id) => state.service.get_user_permissions(id).await,
        Err(e) => Err(e),
    };
    Rpc(result)
}

pub async fn assign_role(
    State(state): State<AppState>,
    payload: Result<Json<AssignRoleRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match body(payload) {
        Ok(request) => request,
        Err(e) => return Rpc(Err(e)),
    };
    let role = match request.role.parse::<RoleName>() {
        Ok(role) => role,
        Err(message) => return Rpc(Err(AuthError::Validation(message))),
    };
    Rpc(state
        .service
        .assign_role(request.user_id, role, request.scope)
        .await)
}

pub async fn revoke_roles(
    State(state): State<AppState>,
    payload: Result<Json<RevokeRolesRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => state.service.revoke_user_roles(request.user_id).await,
        Err(e) => Err(e),
    };
    Rpc(result.map(|grants_removed| RevokedRoles { grants_removed }))
}

pub async fn request_password_reset(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => state.service.request_password_reset(&request.identifier).await,
        Err(e) => Err(e),
    };
    Rpc(result.map(|()| ACK))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    payload: Result<Json<ResetConfirmRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => {
            state
                .service
                .reset_password(&request.token, &request.new_password)
                .await
        }
        Err(e) => Err(e),
    };
    Rpc(result.map(|()| ACK))
}

/// Change the caller's own password; requires a bearer access token
pub async fn change_password(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenInfo>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> impl IntoResponse {
    let result = match body(payload) {
        Ok(request) => {
            state
                .service
                .change_password(
                    caller.user_id,
                    &request.current_password,
                    &request.new_password,
                )
                .await
        }
        Err(e) => Err(e),
    };
    Rpc(result.map(|()| ACK))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(rpc: Rpc<Acknowledged>) -> StatusCode {
        rpc.into_response().status()
    }

    #[test]
    fn business_failures_are_ok_responses() {
        assert_eq!(status_of(Rpc(Ok(ACK))), StatusCode::OK);
        assert_eq!(status_of(Rpc(Err(AuthError::InvalidCredentials))), StatusCode::OK);
        assert_eq!(status_of(Rpc(Err(AuthError::AlreadyUsed))), StatusCode::OK);
        assert_eq!(
            status_of(Rpc(Err(AuthError::validation("bad input")))),
            StatusCode::OK
        );
    }

    #[test]
    fn infrastructure_failures_are_server_errors() {
        assert_eq!(
            status_of(Rpc(Err(AuthError::TransientInfra("redis down".into())))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(Rpc(Err(AuthError::PermanentInfra("bad schema".into())))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn envelope_shape() {
        let ok = serde_json::to_value(Envelope {
            result: Some(ACK),
            error: None,
        })
        .unwrap();
        assert_eq!(ok, serde_json::json!({"result": {"success": true}, "error": null}));

        let failed = serde_json::to_value(Envelope::<Acknowledged>::error("expired")).unwrap();
        assert_eq!(failed, serde_json::json!({"result": null, "error": "expired"}));
    }
}
