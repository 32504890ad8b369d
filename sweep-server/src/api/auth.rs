//! Bearer JWT → `RequestContext`
//!
//! Tokens are minted by the identity provider (HS256). The organization and
//! role come from the `org_id` / `org_role` claims.

use axum::extract::FromRequestParts;
use http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::error::AppError;
use shared::{RequestContext, Role};

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Active organization, absent when the user has none selected
    #[serde(default)]
    pub org_id: Option<String>,
    /// e.g. "org:admin"
    #[serde(default)]
    pub org_role: Option<String>,
    /// Expiration (Unix timestamp seconds)
    pub exp: usize,
}

pub fn decode_token(token: &str, secret: &str) -> Result<RequestContext, AppError> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::token_expired(),
        _ => {
            tracing::debug!(error = %e, "JWT validation failed");
            AppError::invalid_token("Invalid token")
        }
    })?;

    let claims = data.claims;
    let organization_id = claims
        .org_id
        .filter(|o| !o.is_empty())
        .ok_or_else(|| AppError::invalid_token("Token has no organization"))?;
    let role = claims
        .org_role
        .as_deref()
        .map(Role::from_claim)
        .unwrap_or(Role::Member);
    Ok(RequestContext::new(claims.sub, organization_id, role))
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct Auth(pub RequestContext);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<RequestContext>() {
            return Ok(Self(ctx.clone()));
        }

        let token = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!(uri = %parts.uri, "Missing Authorization header");
                AppError::not_authenticated()
            })?
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::invalid_token("Invalid authorization header"))?;

        let ctx = decode_token(token.trim(), &state.secrets.jwt_secret)?;
        parts.extensions.insert(ctx.clone());
        Ok(Self(ctx))
    }
}

#[cfg(test)]
pub(crate) fn issue_token(ctx: &RequestContext, secret: &str, ttl_secs: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header};

    let role = match ctx.role {
        Role::Owner => "org:owner",
        Role::Admin => "org:admin",
        Role::Dispatcher => "org:dispatcher",
        Role::Cleaner => "org:cleaner",
        Role::Member => "org:member",
    };
    let claims = Claims {
        sub: ctx.subject_id.clone(),
        org_id: Some(ctx.organization_id.clone()),
        org_role: Some(role.to_string()),
        exp: (chrono::Utc::now().timestamp() + ttl_secs) as usize,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
