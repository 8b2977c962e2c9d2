//! Access-token verification
//!
//! Tokens are HS256 JWTs whose `sub` claim is the user id. Issuance lives
//! in the identity subsystem; this service only verifies.

use crate::error::{AppError, AppResult};
use actix_web::{http::header, HttpRequest};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;
const AUTH_COOKIE: &str = "auth_token";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id as UUID string
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// `verifyToken(token) -> userId | Unauthorized`
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> AppResult<Uuid>;
}

pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token for `user_id`; used by local tooling and tests
    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("token signing: {e}")))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> AppResult<Uuid> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::warn!("JWT validation failed: {}", e);
            AppError::Unauthorized
        })?;

        Uuid::parse_str(&data.claims.sub).map_err(|e| {
            tracing::warn!("Invalid user_id UUID in token: {}", e);
            AppError::Unauthorized
        })
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
    jwt: Option<String>,
}

/// Bearer header first, then `token`/`jwt` query parameters, then the
/// `auth_token` cookie
pub fn extract_token(req: &HttpRequest) -> Option<String> {
    if let Some(bearer) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(bearer.to_string());
    }

    if let Ok(query) = actix_web::web::Query::<TokenQuery>::from_query(req.query_string()) {
        let query = query.into_inner();
        if let Some(token) = query.token.or(query.jwt).filter(|t| !t.is_empty()) {
            return Some(token);
        }
    }

    req.cookie(AUTH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn issued_token_verifies() {
        let verifier = JwtVerifier::new("secret");
        let user = Uuid::new_v4();
        let token = verifier.issue(user, Duration::hours(1)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), user);
    }

    #[test]
    fn wrong_secret_or_expired_token_is_unauthorized() {
        let user = Uuid::new_v4();
        let token = JwtVerifier::new("a").issue(user, Duration::hours(1)).unwrap();
        assert_eq!(
            JwtVerifier::new("b").verify(&token),
            Err(AppError::Unauthorized)
        );

        let verifier = JwtVerifier::new("a");
        let expired = verifier.issue(user, Duration::hours(-2)).unwrap();
        assert_eq!(verifier.verify(&expired), Err(AppError::Unauthorized));
        assert_eq!(verifier.verify("garbage"), Err(AppError::Unauthorized));
    }

    #[test]
    fn token_sources_in_priority_order() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer from-header"))
            .uri("/ws?token=from-query")
            .to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("from-header"));

        let req = TestRequest::default().uri("/ws?jwt=from-jwt").to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("from-jwt"));

        let req = TestRequest::default()
            .cookie(actix_web::cookie::Cookie::new(AUTH_COOKIE, "from-cookie"))
            .to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("from-cookie"));

        assert_eq!(extract_token(&TestRequest::default().to_http_request()), None);
    }
}
