use subtle::ConstantTimeEq;

/// Constant-time string comparison to prevent timing attacks
/// Use this for comparing confirmation tokens and other operator-supplied secrets
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Token an operator must echo back to run a destructive operation.
///
/// The record count is part of the token, so a plan that changed between the
/// dry run and the execution no longer matches.
pub fn confirmation_token(operation: &str, locale: &str, count: usize) -> String {
    format!("{}:{}:{}", operation, locale, count)
}

/// Check an operator-supplied token against the freshly derived one
pub fn confirms(expected: &str, supplied: &str) -> bool {
    constant_time_compare(expected, supplied.trim())
}
