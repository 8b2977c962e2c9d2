//! Authorization guards that enforce authentication at the type level
//! Handlers taking a `User` cannot run for an anonymous request

use crate::error::AppError;
use crate::middleware::auth::extract_token;
use crate::state::AppState;
use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

/// Represents an authenticated user extracted from the access token
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
}

impl User {
    pub fn authenticate(req: &HttpRequest) -> Result<Self, AppError> {
        let state = req
            .app_data::<web::Data<AppState>>()
            .ok_or_else(|| AppError::Internal("application state missing".into()))?;
        let token = extract_token(req).ok_or(AppError::Unauthorized)?;
        let id = state.auth.verify(&token)?;
        Ok(User { id })
    }
}

impl FromRequest for User {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(User::authenticate(req).map_err(Error::from))
    }
}
