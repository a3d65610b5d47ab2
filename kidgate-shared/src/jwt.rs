use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;

/// Claims carried by every kidgate bearer token. Issuance happens in the
/// external account service; this server only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Parent account id. Device tokens carry the owning parent here.
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub role: Role,
    /// Set on device tokens only; pins the token to one device identifier.
    pub device_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(token: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        token,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> JwtClaims {
        JwtClaims {
            sub: "parent1".into(),
            jti: "jti-1".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
            role: Role::Device,
            device_id: Some("tablet-7".into()),
        }
    }

    #[test]
    fn roundtrip_verifies_with_matching_secret() {
        let token = encode(&claims(), b"secret").unwrap();
        let decoded = decode_and_verify(&token, b"secret").unwrap();
        assert_eq!(decoded.sub, "parent1");
        assert_eq!(decoded.device_id.as_deref(), Some("tablet-7"));
        assert_eq!(decoded.role, Role::Device);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = encode(&claims(), b"secret").unwrap();
        assert!(decode_and_verify(&token, b"other").is_err());
    }
}
