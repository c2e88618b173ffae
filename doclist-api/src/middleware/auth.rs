use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use doclist_core::domain::SessionUser;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, AppState};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,        // Subject (user ID)
    #[serde(default)]
    pub roles: Vec<String>, // User roles
    pub exp: usize,         // Expiration time
    pub iat: usize,         // Issued at
}

impl Claims {
    pub fn new(sub: impl Into<String>, roles: Vec<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: sub.into(),
            roles,
            exp: (now + ttl).timestamp().max(0) as usize,
            iat: now.timestamp().max(0) as usize,
        }
    }
}

impl From<Claims> for SessionUser {
    fn from(claims: Claims) -> Self {
        SessionUser::new(claims.sub, claims.roles)
    }
}

/// Signs `claims` with HS256.
pub fn encode_token(claims: &Claims, secret: &str) -> Result<String, ApiError> {
    Ok(encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Validate JWT token and extract claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(token_data.claims)
}

/// Resolves the session user.
///
/// Requests without an `Authorization` header run as Guest. A header that is
/// present but not a valid bearer token is rejected.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = match request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|h| h.to_str())
    {
        None => SessionUser::guest(),
        Some(Ok(auth_header)) => {
            let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
                ApiError::Unauthorized("expected a Bearer token".to_string())
            })?;
            SessionUser::from(validate_token(token.trim(), &state.jwt_secret)?)
        }
        Some(Err(_)) => {
            return Err(ApiError::Unauthorized(
                "malformed Authorization header".to_string(),
            ))
        }
    };

    tracing::debug!(user = %user.user_id, "Session resolved");
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_keeps_roles() {
        let claims = Claims::new(
            "jane@example.com",
            vec!["Member".to_string()],
            Duration::hours(1),
        );
        let token = encode_token(&claims, "secret").unwrap();

        let user = SessionUser::from(validate_token(&token, "secret").unwrap());
        assert_eq!(user.user_id.as_str(), "jane@example.com");
        assert!(user.has_role("Member"));
    }

    #[test]
    fn test_token_rejected_with_wrong_secret_or_expired() {
        let claims = Claims::new("jane@example.com", vec![], Duration::hours(1));
        let token = encode_token(&claims, "secret").unwrap();
        assert!(matches!(
            validate_token(&token, "other"),
            Err(ApiError::Unauthorized(_))
        ));

        let expired = Claims::new("jane@example.com", vec![], Duration::hours(-2));
        let token = encode_token(&expired, "secret").unwrap();
        assert!(validate_token(&token, "secret").is_err());
    }
}
