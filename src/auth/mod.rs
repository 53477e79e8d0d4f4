//! Authentication for write requests
//!
//! Every mutation needs an owner. It comes from the bearer token's subject,
//! or in dev mode from an `X-Owner-Id` header.

pub mod jwt;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenValidationResult};

use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;

use crate::types::GateError;

/// Dev-mode header naming the owner directly
pub const OWNER_HEADER: &str = "x-owner-id";

/// Resolve the owner of a request
pub fn resolve_owner(
    headers: &HeaderMap,
    validator: Option<&JwtValidator>,
    dev_mode: bool,
) -> Result<String, GateError> {
    let auth_header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    if let (Some(token), Some(validator)) = (extract_token_from_header(auth_header), validator) {
        let result = validator.verify_token(token);
        return match result.claims {
            Some(claims) if result.valid => Ok(claims.sub),
            _ => Err(GateError::Unauthorized(
                result.error.unwrap_or_else(|| "Invalid token".into()),
            )),
        };
    }

    if dev_mode {
        if let Some(owner) = headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return Ok(owner.to_string());
        }
    }

    Err(GateError::Unauthorized("Missing bearer token".into()))
}
