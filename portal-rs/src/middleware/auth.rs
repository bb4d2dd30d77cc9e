use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Audience the auth service stamps on user access tokens.
pub const TOKEN_AUDIENCE: &str = "authenticated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: Option<String>,
    pub role: Option<String>,
    pub aud: Option<String>,
    pub exp: i64,
}

/// Caller of an authenticated route.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub access_token: String,
}

pub fn verify_token(token: &str, secret: &str) -> AppResult<Claims> {
    let mut validation = Validation::default();
    validation.set_audience(&[TOKEN_AUDIENCE]);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Checks the token locally when a signing secret is configured.
/// Returns the user id on success, `None` when it cannot be decided locally.
pub fn verify_locally(token: &str, secret: Option<&str>) -> Option<Uuid> {
    let secret = secret?;
    match verify_token(token, secret) {
        Ok(claims) => Uuid::parse_str(&claims.sub).ok(),
        Err(e) => {
            tracing::debug!("local token verification failed: {e}");
            None
        }
    }
}

/// Middleware: requires a bearer token the auth service accepts.
/// Sets `AuthSession` in extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer(req.headers())
        .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;

    let user_id = match verify_locally(&token, state.config.backend.jwt_secret.as_deref()) {
        Some(id) => id,
        None => {
            state
                .backend
                .get_user(&token)
                .await
                .map_err(|e| AppError::Unauthorized(e.user_message()))?
                .id
        }
    };

    req.extensions_mut().insert(AuthSession {
        user_id,
        access_token: token,
    });

    Ok(next.run(req).await)
}
