//! Bearer token handling
//!
//! HS256 tokens whose `sub` claim names the owner of every mutation the
//! bearer submits.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::GateError;

/// Payload stored in the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Owner id
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Result of token validation
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.into()),
        }
    }
}

/// Token validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
}

impl JwtValidator {
    /// Returns an error if the secret is empty
    pub fn new(secret: String) -> Result<Self, GateError> {
        if secret.is_empty() {
            return Err(GateError::Config("JWT_SECRET must not be empty".into()));
        }
        Ok(Self { secret })
    }

    /// Sign a token for `subject` valid for `ttl_secs`
    pub fn generate_token(&self, subject: &str, ttl_secs: u64) -> Result<String, GateError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| GateError::Auth(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| GateError::Auth(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a token
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(token_data) if token_data.claims.sub.trim().is_empty() => {
                TokenValidationResult::invalid("Token has no subject")
            }
            Ok(token_data) => TokenValidationResult::valid(token_data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let error_msg = match err.kind() {
                    ErrorKind::ExpiredSignature => "Token expired",
                    ErrorKind::InvalidToken => "Invalid token",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    _ => "Token validation failed",
                };
                TokenValidationResult::invalid(error_msg)
            }
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> JwtValidator {
        JwtValidator::new("change-me".into()).unwrap()
    }

    #[test]
    fn test_generate_and_verify_token() {
        let validator = validator();
        let token = validator.generate_token("test-user", 3600).unwrap();

        let result = validator.verify_token(&token);
        assert!(result.valid);
        assert_eq!(result.claims.unwrap().sub, "test-user");
    }

    #[test]
    fn test_wrong_secret() {
        let token = validator().generate_token("u1", 3600).unwrap();
        let other = JwtValidator::new("another-secret".into()).unwrap();

        let result = other.verify_token(&token);
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("Invalid signature"));
    }

    #[test]
    fn test_garbage_token() {
        let result = validator().verify_token("not-a-token");
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(JwtValidator::new(String::new()).is_err());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(extract_token_from_header(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("Bearer   ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc")), None);
        assert_eq!(extract_token_from_header(None), None);
    }
}
