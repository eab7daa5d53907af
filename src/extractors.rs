//! Custom extractors: JSON/Query wrappers that return structured errors,
//! plus the trusted-identity extractors for user and admin callers.
//!
//! Authentication itself is an external collaborator's job; a gateway in
//! front of this service injects the already-authenticated user id.

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::AppError;

/// JSON extractor that returns `AppError` on failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let result = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok(Json(result.0))
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

/// Query extractor that returns `AppError` on failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct Query<T>(pub T);

impl<S, T> FromRequestParts<S> for Query<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let result = axum::extract::Query::<T>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok(Query(result.0))
    }
}

/// The authenticated principal, as asserted by the upstream gateway via the
/// `x-user-id` header. This service never authenticates.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or(AppError::Unauthorized)?;
        Ok(AuthUser(user_id.to_string()))
    }
}

/// Admin authorization via the `x-admin-key` header, compared in constant
/// time against the configured key.
#[derive(Debug, Clone, Copy)]
pub struct AdminKey;

impl FromRequestParts<AppState> for AdminKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.admin_api_key.is_empty() {
            // Unconfigured admin key means the surface is disabled, not open.
            return Err(AppError::Unauthorized);
        }

        let provided = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        let expected = state.admin_api_key.as_bytes();
        let provided = provided.as_bytes();
        if expected.len() != provided.len() {
            return Err(AppError::Unauthorized);
        }
        if !bool::from(expected.ct_eq(provided)) {
            return Err(AppError::Unauthorized);
        }

        Ok(AdminKey)
    }
}
