use crate::domain::Role;
use axum::http::header::HeaderMap;
use std::str::FromStr;

pub(super) fn parse_role(role: Option<&str>) -> Option<Role> {
    match role.map(str::trim) {
        None | Some("") => Some(Role::User),
        Some(role) => Role::from_str(&role.to_lowercase()).ok(),
    }
}

pub(super) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
