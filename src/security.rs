//! Admin API authentication
//!
//! The dead-letter inspection and replay routes sit behind a single bearer
//! token read from `CLIPPER_WEBHOOKS_ADMIN_TOKEN`. When no token is configured
//! the admin surface answers `404` as if it did not exist.
//!
//! ```text
//! Request -> require_admin -> AdminAuth::authenticate -> Handler
//! ```
//!
//! The token is only ever held as a SHA-256 digest and compared in constant
//! time.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

// =============================================================================
// Authentication
// =============================================================================

/// Token-based authentication result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// Authentication successful
    Authenticated,
    /// No admin token configured; the admin surface is off
    Disabled,
    /// Authentication failed - missing header
    MissingHeader,
    /// Authentication failed - invalid format
    InvalidFormat,
    /// Authentication failed - invalid token
    InvalidToken,
}

impl AuthResult {
    /// Check if authentication was successful
    pub fn is_ok(&self) -> bool {
        matches!(self, AuthResult::Authenticated)
    }

    /// HTTP status for the result
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthResult::Authenticated => StatusCode::OK,
            AuthResult::Disabled => StatusCode::NOT_FOUND,
            AuthResult::MissingHeader | AuthResult::InvalidFormat | AuthResult::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
        }
    }

    /// Get error message for authentication failure
    pub fn error_message(&self) -> Option<&'static str> {
        match self {
            AuthResult::Authenticated => None,
            AuthResult::Disabled => Some("Not found"),
            AuthResult::MissingHeader => Some("Missing Authorization header"),
            AuthResult::InvalidFormat => {
                Some("Invalid Authorization format. Expected: Bearer <token>")
            }
            AuthResult::InvalidToken => Some("Invalid token"),
        }
    }
}

/// Bearer-token authenticator for the admin routes
#[derive(Clone)]
pub struct AdminAuth {
    token_hash: Option<[u8; 32]>,
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AdminAuth {
    /// Authenticator for `token`; `None` or an empty token disables the surface
    pub fn new(token: Option<&str>) -> Self {
        let token_hash = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(hash_token);
        Self { token_hash }
    }

    /// Whether a token is configured
    pub fn is_enabled(&self) -> bool {
        self.token_hash.is_some()
    }

    /// Authenticate a request based on the Authorization header
    ///
    /// Expected format: `Authorization: Bearer <token>`
    pub fn authenticate(&self, auth_header: Option<&str>) -> AuthResult {
        let Some(expected) = self.token_hash else {
            return AuthResult::Disabled;
        };

        let header = match auth_header {
            Some(h) => h,
            None => return AuthResult::MissingHeader,
        };

        let token = match header.strip_prefix("Bearer ") {
            Some(t) => t.trim(),
            None => return AuthResult::InvalidFormat,
        };

        if token.is_empty() {
            return AuthResult::InvalidFormat;
        }

        if constant_time_compare(&expected, &hash_token(token)) {
            AuthResult::Authenticated
        } else {
            warn!("Invalid admin token attempt");
            AuthResult::InvalidToken
        }
    }
}

fn hash_token(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// =============================================================================
// Middleware
// =============================================================================

/// Headers applied to every admin response
pub fn security_headers() -> [(header::HeaderName, HeaderValue); 3] {
    [
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        ),
        (header::REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
    ]
}

/// axum middleware guarding the admin router
///
/// Mount with `axum::middleware::from_fn_with_state(auth, require_admin)`.
pub async fn require_admin(State(auth): State<AdminAuth>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let result = auth.authenticate(header);
    let mut response = if result.is_ok() {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), result = ?result, "Admin request refused");
        let body = serde_json::json!({ "error": result.error_message().unwrap_or_default() });
        (result.status_code(), Json(body)).into_response()
    };

    let headers = response.headers_mut();
    for (name, value) in security_headers() {
        headers.insert(name, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "test-admin-token-for-unit-tests-only";

    #[test]
    fn test_token_authenticator() {
        let auth = AdminAuth::new(Some(TOKEN));
        assert!(auth.is_enabled());

        assert_eq!(
            auth.authenticate(Some(&format!("Bearer {TOKEN}"))),
            AuthResult::Authenticated
        );
        assert_eq!(
            auth.authenticate(Some("Bearer wrong-token")),
            AuthResult::InvalidToken
        );
        assert_eq!(auth.authenticate(None), AuthResult::MissingHeader);
        assert_eq!(
            auth.authenticate(Some("Basic dXNlcjpwYXNz")),
            AuthResult::InvalidFormat
        );
        assert_eq!(auth.authenticate(Some("Bearer   ")), AuthResult::InvalidFormat);
    }

    #[test]
    fn test_disabled_without_token() {
        for auth in [AdminAuth::new(None), AdminAuth::new(Some("  "))] {
            assert!(!auth.is_enabled());
            assert_eq!(
                auth.authenticate(Some(&format!("Bearer {TOKEN}"))),
                AuthResult::Disabled
            );
        }
    }

    #[test]
    fn test_auth_result_status_codes() {
        assert_eq!(AuthResult::Authenticated.status_code(), StatusCode::OK);
        assert_eq!(AuthResult::Disabled.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthResult::InvalidToken.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert!(AuthResult::Authenticated.error_message().is_none());
        assert!(AuthResult::MissingHeader.error_message().is_some());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"hello", b"hello"));
        assert!(!constant_time_compare(b"hello", b"world"));
        assert!(!constant_time_compare(b"hello", b"hell"));
        assert!(!constant_time_compare(b"", b"x"));
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", AdminAuth::new(Some(TOKEN)));
        assert!(!rendered.contains(TOKEN));
        assert!(rendered.contains("enabled: true"));
    }
}
