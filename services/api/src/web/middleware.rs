//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use attendance_core::{domain::User, ports::PortError};
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::web::state::AppState;

/// The authenticated account, inserted into request extensions by `require_auth`.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Pulls the login token from the `session` cookie or an `Authorization: Bearer` header.
pub fn auth_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|c| {
                let c = c.trim();
                c.strip_prefix("session=")
            })
        })
        .filter(|token| !token.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    })
}

/// Middleware that validates the login token and loads the user.
///
/// If valid, inserts a `CurrentUser` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // 1. Extract the token
    let token = auth_token(req.headers()).ok_or(PortError::Unauthorized)?;

    // 2. Validate the auth session, get user_id
    let user_id = state
        .db
        .validate_auth_session(token, state.clock.now())
        .await
        .map_err(|e| {
            warn!("Rejected auth token: {}", e);
            PortError::Unauthorized
        })?;

    // 3. Load the account behind it
    let user = state.db.get_user(user_id).await.map_err(|e| match e {
        PortError::NotFound(_) => PortError::Unauthorized,
        other => other,
    })?;

    // 4. Insert the user into request extensions and continue to the handler
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}
