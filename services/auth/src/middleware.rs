//! Middleware for access token validation

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::warn;

use crate::{AppState, routes::Envelope, service::TokenInfo};

fn unauthorized(class: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(Envelope::<TokenInfo>::error(class)),
    )
        .into_response()
}

/// Verify the bearer access token and expose its [`TokenInfo`] to the handler
pub async fn require_bearer(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return unauthorized("missing_bearer_token");
    };

    let caller = match state.service.validate_token(bearer.token()) {
        Ok(caller) => caller,
        Err(e) => {
            warn!("Rejected access token: {}", e);
            return unauthorized(e.kind());
        }
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}
