//! Session validation for access tokens issued by the managed auth service

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Audience the auth service stamps on end-user tokens
const AUTHENTICATED_AUDIENCE: &str = "authenticated";

/// JWT claims we read; `exp` and `aud` are checked by the validator itself
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String, // user id (UUID)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    Expired,
}

/// Validate a JWT access token and return the user id
pub fn validate_access_token(token: &str, secret: &[u8]) -> Result<Uuid, SessionError> {
    // Pin HS256 to prevent algorithm confusion
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation.set_audience(&[AUTHENTICATED_AUDIENCE]);

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::InvalidToken,
        })?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| SessionError::InvalidToken)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};

    pub(crate) const SECRET: &[u8] = b"test-secret";

    pub(crate) fn token_for(sub: &str, ttl: Duration) -> String {
        let now = Utc::now();
        let claims = serde_json::json!({
            "sub": sub,
            "exp": (now + ttl).timestamp(),
            "iat": now.timestamp(),
            "aud": AUTHENTICATED_AUDIENCE,
            "role": "authenticated",
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[test]
    fn valid_token_yields_user_id() {
        let user_id = Uuid::new_v4();
        let token = token_for(&user_id.to_string(), Duration::minutes(10));
        assert_eq!(validate_access_token(&token, SECRET), Ok(user_id));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let token = token_for(&Uuid::new_v4().to_string(), Duration::minutes(-10));
        assert_eq!(validate_access_token(&token, SECRET), Err(SessionError::Expired));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = token_for(&Uuid::new_v4().to_string(), Duration::minutes(10));
        assert_eq!(
            validate_access_token(&token, b"other-secret"),
            Err(SessionError::InvalidToken)
        );
    }

    #[test]
    fn non_uuid_subject_is_invalid() {
        let token = token_for("42", Duration::minutes(10));
        assert_eq!(validate_access_token(&token, SECRET), Err(SessionError::InvalidToken));
    }
}
