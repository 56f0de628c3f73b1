//! Authentication and authorization middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use lectern_core::Requester;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is sanitized: truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        // Limit by character count, not byte count, to safely handle
        // multi-byte UTF-8, then filter to ASCII for log safety.
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Hash a token for config lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    hex_encode(result)
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

/// Authentication middleware that resolves the requester identity and sets
/// up trace context.
///
/// Requests without an Authorization header proceed as [`Requester::Anonymous`].
/// A bearer token that matches no configured token hash is rejected with 401
/// rather than downgraded to anonymous, so a premium member with a typo'd
/// token sees an auth failure instead of a confusing 403.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let requester = match extract_bearer_token(&req) {
        Some(token_str) => {
            let token_hash = hash_token(token_str);
            match state.tokens.get(&token_hash) {
                Some(role) => Requester::from_role(*role),
                None => {
                    return Err(ApiError::Unauthorized("unknown token".to_string()));
                }
            }
        }
        None => Requester::Anonymous,
    };

    req.extensions_mut().insert(requester);

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Require an admin requester.
pub fn require_admin(requester: Requester) -> ApiResult<()> {
    match requester {
        Requester::Admin => Ok(()),
        Requester::Anonymous => Err(ApiError::Unauthorized(
            "authentication required".to_string(),
        )),
        Requester::Member { .. } => Err(ApiError::Forbidden("admin role required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::Role;

    #[test]
    fn hash_token_is_sha256_hex() {
        // SHA256 of the empty string
        assert_eq!(
            hash_token(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_token("secret").len(), 64);
    }

    #[test]
    fn trace_id_sanitizes_client_values() {
        let id = TraceId::from_client("abc-123");
        assert_eq!(id.as_str(), "abc-123");

        let id = TraceId::from_client("evil\nvalue");
        assert_eq!(id.as_str(), "evilvalue");

        // Empty after sanitization falls back to a generated ID
        let id = TraceId::from_client("\n\t");
        assert!(!id.as_str().is_empty());

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);
    }

    #[test]
    fn require_admin_distinguishes_401_from_403() {
        assert!(require_admin(Requester::Admin).is_ok());
        assert!(matches!(
            require_admin(Requester::Anonymous),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            require_admin(Requester::from_role(Role::Premium)),
            Err(ApiError::Forbidden(_))
        ));
    }
}
