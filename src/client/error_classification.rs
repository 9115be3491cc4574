//! Error classification logic

/// Map an HTTP status from a backend to a standard error class.
pub(crate) fn classify_status(status: u16) -> &'static str {
    match status {
        400 | 422 => "invalid_request",
        401 => "authentication",
        402 => "quota_exhausted",
        403 => "permission_denied",
        404 => "not_found",
        408 => "timeout",
        409 => "conflict",
        413 => "request_too_large",
        429 => "rate_limited",
        499 => "cancelled",
        529 => "overloaded",
        500..=599 => "server_error",
        _ => "http_error",
    }
}

/// Whether a failure of this class is likely to succeed on a retry of the same model.
///
/// Fallback moves on to the next candidate regardless; this only feeds logs so
/// operators can tell outages from bad requests.
pub(crate) fn is_transient_error_class(error_class: &str) -> bool {
    match error_class {
        "rate_limited" | "overloaded" | "overloaded_error" | "server_error" | "timeout"
        | "conflict" | "transport" | "api_error" => true,
        "invalid_request" | "invalid_request_error" | "authentication" | "permission_denied"
        | "not_found" | "request_too_large" | "cancelled" | "quota_exhausted" => false,
        // Unknown/other - conservative
        _ => false,
    }
}
