//! Signed bearer tokens for local-auth mode (HS256).

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use confab_core::types::UserRole;
use confab_core::{ApiError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: UserRole,
    pub exp: i64,
}

pub fn issue(secret: &str, user_id: &str, role: UserRole, expiry_hours: u64) -> Result<String> {
    let exp = (Utc::now() + Duration::hours(expiry_hours as i64)).timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {}", e)))
}

pub fn verify(secret: &str, token: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| ApiError::Unauthorized(format!("invalid token: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_verify_round_trips_subject_and_role() {
        let token = issue("secret", "u1", UserRole::Manager, 12).unwrap();
        let claims = verify("secret", &token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, UserRole::Manager);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue("secret", "u1", UserRole::User, 12).unwrap();
        assert!(verify("other", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // Sign an already-expired claim directly.
        let claims = Claims {
            sub: "u1".to_string(),
            role: UserRole::User,
            exp: (Utc::now() - Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify("secret", &token).is_err());
    }
}
