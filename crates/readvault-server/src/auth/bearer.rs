//! `Authorization: Bearer <value>` header parsing.

use super::AuthError;

/// Extract the credential from an `Authorization` header value.
///
/// The header must be exactly two space-separated tokens, the first being
/// the `Bearer` scheme (any case).
pub fn parse_bearer(header: &str) -> Result<&str, AuthError> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(value), None)
            if scheme.eq_ignore_ascii_case("bearer") && !value.is_empty() =>
        {
            Ok(value)
        }
        _ => Err(AuthError::MalformedHeader),
    }
}
