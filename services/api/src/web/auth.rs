//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for login, logout and the current account.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use attendance_core::{domain::User, ports::PortError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::{
    middleware::{auth_token, CurrentUser},
    state::AppState,
};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub id_number: Option<String>,
    pub role: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            id_number: user.id_number.clone(),
            role: user.role.to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    /// Also set as the `session` cookie; mobile clients send it as a bearer token.
    pub token: String,
    pub user: UserResponse,
}

//=========================================================================================
// Password Hashing
//=========================================================================================

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ApiError::Internal("Failed to hash password".to_string())
        })
}

fn verify_password(password: &str, hashed: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(hashed).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/login - Login with an existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // 1. Get user by email
    let creds = state.db.get_user_by_email(&req.email).await.map_err(|e| match e {
        PortError::NotFound(_) => {
            warn!("Login attempt for unknown email");
            PortError::Unauthorized
        }
        other => other,
    })?;

    // 2. Verify password
    if !verify_password(&req.password, &creds.hashed_password)? {
        warn!("Failed login for user {}", creds.user.id);
        return Err(PortError::Unauthorized.into());
    }

    // 3. Create the auth session
    let token = Uuid::new_v4().to_string();
    let ttl = state.config.auth_session_ttl;
    state
        .db
        .create_auth_session(&token, creds.user.id, state.clock.now() + ttl)
        .await?;
    info!("User {} logged in as {}", creds.user.id, creds.user.role);

    // 4. Return response with cookie
    let cookie = format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        token,
        ttl.num_seconds()
    );
    let response = LoginResponse {
        token,
        user: UserResponse::from(&creds.user),
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /auth/logout - Logout and invalidate the session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session", body = crate::error::ErrorBody)
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = auth_token(&headers).ok_or(PortError::Unauthorized)?;
    state.db.delete_auth_session(token).await?;

    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]))
}

/// GET /me - The logged-in account
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not logged in", body = crate::error::ErrorBody)
    )
)]
pub async fn me_handler(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}
