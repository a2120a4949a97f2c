//! Bearer-token authentication for the upload endpoints.
//!
//! Uploaders send `Authorization: Bearer <api token>`; the token is looked up
//! in the `users` table. Callers without a known token are sent to the login
//! page before the request body is touched.

use crate::{errors::AppError, models::user::User, state::AppState};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, warn};

/// The authenticated uploader.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

pub enum AuthRejection {
    Login(String),
    Internal(AppError),
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            AuthRejection::Login(path) => Redirect::to(&path).into_response(),
            AuthRejection::Internal(err) => err.into_response(),
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let Some(token) = bearer_token(parts) else {
            debug!(uri = %parts.uri, "upload without credentials");
            return Err(AuthRejection::Login(state.login_path.clone()));
        };

        let user = state
            .repo
            .find_user_by_token(token)
            .await
            .map_err(|e| AuthRejection::Internal(e.into()))?;
        match user {
            Some(user) => {
                let user = CurrentUser(user);
                parts.extensions.insert(user.clone());
                Ok(user)
            }
            None => {
                warn!(uri = %parts.uri, "upload with unknown token");
                Err(AuthRejection::Login(state.login_path.clone()))
            }
        }
    }
}
