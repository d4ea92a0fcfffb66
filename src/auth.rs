//! Bearer-token authentication.
//!
//! Handlers receive the caller as an explicit [`Identity`] extracted from the
//! `Authorization` header and pass it down to the services.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, AppResult, DomainError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[serde(alias = "ROLE_USER")]
    User,
    #[serde(alias = "ROLE_ADMIN")]
    Admin,
}

/// The authenticated caller of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub roles: Vec<Role>,
}

impl Identity {
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id,
            roles: vec![Role::User],
        }
    }

    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            roles: vec![Role::User, Role::Admin],
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(DomainError::Forbidden {
                reason: "administrator role required".to_string(),
            }
            .into())
        }
    }

    /// Owners and administrators may act on a user's resources.
    pub fn require_owner_or_admin(&self, owner_id: i64) -> AppResult<()> {
        if self.user_id == owner_id || self.is_admin() {
            Ok(())
        } else {
            Err(DomainError::Forbidden {
                reason: "resource belongs to another user".to_string(),
            }
            .into())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    roles: Vec<Role>,
    exp: usize,
}

pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn authenticate(&self, token: &str) -> AppResult<Identity> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            let reason = match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => "token expired",
                _ => "invalid token",
            };
            debug!(error = %e, "bearer token rejected");
            unauthenticated(reason)
        })?;

        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| unauthenticated("invalid subject"))?;

        let mut roles = data.claims.roles;
        if roles.is_empty() {
            roles.push(Role::User);
        }

        Ok(Identity { user_id, roles })
    }

    /// Signs a token for `identity` valid for `ttl`.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> AppResult<String> {
        let exp = (Utc::now() + ttl).timestamp().max(0) as usize;
        let claims = Claims {
            sub: identity.user_id.to_string(),
            roles: identity.roles.clone(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::configuration(format!("failed to sign token: {}", e)))
    }
}

fn unauthenticated(reason: &str) -> AppError {
    DomainError::Unauthenticated {
        reason: reason.to_string(),
    }
    .into()
}

impl<S> FromRequestParts<S> for Identity
where
    Arc<JwtAuthenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authenticator = Arc::<JwtAuthenticator>::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| unauthenticated("missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| unauthenticated("expected a Bearer token"))?;

        authenticator.authenticate(token)
    }
}
