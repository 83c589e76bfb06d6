//! HTTP Basic-auth middleware and standalone verifier.

use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::{Request, State},
  http::{HeaderMap, header},
  middleware::Next,
  response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::Error;

/// The tutor account allowed through to `/api`.
#[derive(Clone)]
pub struct AuthConfig {
  pub username:      String,
  /// argon2 PHC string, as printed by `ladder-server --hash-password`.
  pub password_hash: String,
}

impl AuthConfig {
  /// Whether `username` and `password` match this account. A hash that does
  /// not parse matches nothing.
  fn accepts(&self, username: &str, password: &str) -> bool {
    if username != self.username {
      return false;
    }
    PasswordHash::new(&self.password_hash).is_ok_and(|hash| {
      Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .is_ok()
    })
  }
}

/// Pull `(username, password)` out of an `Authorization: Basic` header. The
/// scheme name is matched case-insensitively.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
  let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
  let (scheme, token) = value.split_once(' ')?;
  if !scheme.eq_ignore_ascii_case("basic") {
    return None;
  }

  let decoded = String::from_utf8(B64.decode(token.trim()).ok()?).ok()?;
  let (username, password) = decoded.split_once(':')?;
  Some((username.to_owned(), password.to_owned()))
}

pub fn verify_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<(), Error> {
  match basic_credentials(headers) {
    Some((username, password)) if config.accepts(&username, &password) => Ok(()),
    _ => Err(Error::Unauthorized),
  }
}

/// Reject the request with `401` unless it carries valid credentials.
pub async fn require_auth(
  State(config): State<Arc<AuthConfig>>,
  req: Request,
  next: Next,
) -> Result<Response, Error> {
  if let Err(e) = verify_auth(req.headers(), &config) {
    tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
    return Err(e);
  }
  Ok(next.run(req).await)
}
