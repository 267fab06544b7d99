//! Bearer token verification.
//!
//! Tokens are issued elsewhere. This service only checks the HS256 signature,
//! expiry, issuer and audience, and reads the user id from `sub`.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError};

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Checks access tokens against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, &config.auth_issuer, &config.auth_audience)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Rejected access token");
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        ServiceError::Unauthorized("Token has expired".to_string())
                    }
                    _ => ServiceError::Unauthorized("Invalid token".to_string()),
                }
            })
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<TokenVerifier>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?;

        let claims = verifier.verify(token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(AuthUser { user_id })
    }
}
