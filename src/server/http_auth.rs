use crate::domain::Caller;
use axum::http::{header, header::HeaderMap};
use uuid::Uuid;

/// Set by the upstream auth gateway once it has authenticated the user.
pub(super) const ACCOUNT_ID_HEADER: &str = "x-account-id";

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

pub(super) fn is_admin_authorized(headers: &HeaderMap, expected_token: &str) -> bool {
    !expected_token.is_empty() && extract_bearer_token(headers) == Some(expected_token)
}

/// Admin bearer token wins; otherwise the gateway-forwarded account id.
pub(super) fn resolve_caller(headers: &HeaderMap, admin_token: &str) -> Option<Caller> {
    if is_admin_authorized(headers, admin_token) {
        return Some(Caller::Admin);
    }

    headers
        .get(ACCOUNT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .map(Caller::Account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_bearer_token_happy_path() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn extract_bearer_token_rejects_missing_empty_or_wrong_scheme() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let mut empty = HeaderMap::new();
        empty.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&empty), None);

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(extract_bearer_token(&basic), None);
    }

    #[test]
    fn admin_token_must_be_configured_and_match() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer admin-secret"));

        assert_eq!(resolve_caller(&headers, "admin-secret"), Some(Caller::Admin));
        assert_eq!(resolve_caller(&headers, "other"), None);
        assert!(!is_admin_authorized(&headers, ""));
    }

    #[test]
    fn account_header_identifies_the_caller() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCOUNT_ID_HEADER,
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        assert_eq!(resolve_caller(&headers, "admin-secret"), Some(Caller::Account(id)));

        let mut garbage = HeaderMap::new();
        garbage.insert(ACCOUNT_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(resolve_caller(&garbage, "admin-secret"), None);
    }
}
