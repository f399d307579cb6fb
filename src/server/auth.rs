use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::warn;

use super::AppState;
use super::handlers::ApiError;
use crate::crypto::constant_time_eq;

/// Username of a request that passed HTTP Basic authentication
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some((username, password)) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_basic)
        else {
            return Err(ApiError::Unauthorized);
        };

        if verify(&state.config.users, &username, &password) {
            Ok(AuthUser(username))
        } else {
            warn!(user = %username, "Rejected credentials");
            Err(ApiError::Unauthorized)
        }
    }
}

/// `Basic base64(user:password)`; the password may itself contain ':'
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(BASE64.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Fixed-length digests make the comparison independent of how much of the
/// password matches. Unknown users still pay for one comparison.
fn verify(users: &HashMap<String, String>, username: &str, password: &str) -> bool {
    let supplied = Sha256::digest(password.as_bytes());
    match users.get(username) {
        Some(expected) => constant_time_eq(&supplied, &Sha256::digest(expected.as_bytes())),
        None => {
            std::hint::black_box(constant_time_eq(&supplied, &[0u8; 32]));
            false
        }
    }
}
