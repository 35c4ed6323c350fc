//! HTTP Basic authentication for the debug console
//!
//! One username/password pair, fixed for the life of the process.

use crate::config::ConsoleConfig;
use crate::error::ConsoleError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;

/// Random bytes in a generated password
const GENERATED_PASSWORD_BYTES: usize = 18;

/// The single accepted credential pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials from configuration, generating a password when none is set
    ///
    /// The flag is `true` when the password was generated.
    pub fn resolve(config: &ConsoleConfig) -> (Self, bool) {
        match config.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => (Self::new(&config.username, password), false),
            None => (Self::new(&config.username, generate_password()), true),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Check an `Authorization` header value
    pub fn verify_header(&self, header: &str) -> bool {
        let Some(encoded) = header
            .strip_prefix("Basic ")
            .or_else(|| header.strip_prefix("basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, pass)) = text.split_once(':') else {
            return false;
        };
        // Evaluate both so a wrong username takes as long as a wrong password
        let user_ok = secret_matches(user.as_bytes(), self.username.as_bytes());
        let pass_ok = secret_matches(pass.as_bytes(), self.password.as_bytes());
        (user_ok & pass_ok).into()
    }

    /// `Authorization` header value for these credentials
    pub fn header_value(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

/// URL-safe random password
pub fn generate_password() -> String {
    let mut bytes = [0u8; GENERATED_PASSWORD_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare a supplied secret against the expected one
///
/// The work depends only on the expected length, so a short or long guess
/// takes as long as one of the right size.
fn secret_matches(provided: &[u8], expected: &[u8]) -> Choice {
    let same_len = (provided.len() as u64).ct_eq(&(expected.len() as u64));
    let mut padded = vec![0u8; expected.len()];
    let shared = provided.len().min(expected.len());
    padded[..shared].copy_from_slice(&provided[..shared]);
    same_len & padded.as_slice().ct_eq(expected)
}

/// Middleware rejecting requests without the configured credentials
pub async fn require_basic(
    State(credentials): State<Arc<Credentials>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| credentials.verify_header(value));

    if authorized {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "Rejected console request without valid credentials");
        ConsoleError::Unauthorized.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(password: Option<&str>) -> ConsoleConfig {
        ConsoleConfig {
            host: "127.0.0.1".into(),
            port: 7860,
            username: "local".into(),
            password: password.map(String::from),
        }
    }

    #[test]
    fn test_configured_password_used() {
        let (credentials, generated) = Credentials::resolve(&config(Some("s3cret")));
        assert!(!generated);
        assert_eq!(credentials.password(), "s3cret");
    }

    #[test]
    fn test_password_generated_when_missing() {
        let (first, generated) = Credentials::resolve(&config(None));
        assert!(generated);
        assert_eq!(first.username(), "local");
        assert_eq!(first.password().len(), 24);

        let (second, _) = Credentials::resolve(&config(Some("")));
        assert_ne!(first.password(), second.password());
    }

    #[test]
    fn test_verify_header() {
        let credentials = Credentials::new("local", "pw");
        assert!(credentials.verify_header(&credentials.header_value()));
        assert!(!credentials.verify_header("Basic bG9jYWw6bm9wZQ=="));
        assert!(!credentials.verify_header("Bearer abc"));
        assert!(!credentials.verify_header("Basic !!!"));
        assert!(!Credentials::new("other", "pw").verify_header(&credentials.header_value()));
    }

    #[test]
    fn test_password_length_mismatch_rejected() {
        let credentials = Credentials::new("local", "pw");
        let prefix = Credentials::new("local", "p");
        let extended = Credentials::new("local", "pw-and-more");
        assert!(!credentials.verify_header(&prefix.header_value()));
        assert!(!credentials.verify_header(&extended.header_value()));
        assert!(!Credentials::new("local", "").verify_header(&credentials.header_value()));
    }

    #[test]
    fn test_secret_matches() {
        assert!(bool::from(secret_matches(b"abc", b"abc")));
        assert!(!bool::from(secret_matches(b"abd", b"abc")));
        assert!(!bool::from(secret_matches(b"ab", b"abc")));
        assert!(!bool::from(secret_matches(b"abcd", b"abc")));
        assert!(bool::from(secret_matches(b"", b"")));
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("local", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
