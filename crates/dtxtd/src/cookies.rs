//! Cookie header parsing and `Set-Cookie` values

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// First value of cookie `name` across all `Cookie` headers.
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// HttpOnly, SameSite=Lax, Path=/ cookie expiring at `expires`.
pub fn set(name: &str, value: &str, expires: DateTime<Utc>) -> String {
    format!(
        "{name}={value}; Path=/; Expires={}; HttpOnly; SameSite=Lax",
        expires.format(HTTP_DATE)
    )
}

/// Overwrite `name` with an empty, already expired value.
pub fn clear(name: &str) -> String {
    format!("{name}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=-1; HttpOnly; SameSite=Lax")
}
