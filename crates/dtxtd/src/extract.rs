//! Request extractors: session user, client address and share token

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts, Query};
use axum::http::request::Parts;
use dtxt_auth::ShareAccess;
use dtxt_core::{UserId, SESSION_COOKIE};
use dtxt_crypto::Key32;
use serde::Deserialize;

use crate::cookies;
use crate::error::ApiError;
use crate::server::AppState;

/// The caller behind a valid `token` cookie.
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
    pub derived: Key32,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = cookies::read(&parts.headers, SESSION_COOKIE).ok_or_else(ApiError::unauthorized)?;
        let claims = state.sessions.validate(&token)?;
        let derived = claims.derived_key().map_err(|e| {
            tracing::debug!("session carries an unreadable key: {e}");
            ApiError::unauthorized()
        })?;
        Ok(Self {
            user_id: claims.user_id,
            username: claims.name,
            derived,
        })
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let forwarded = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|hop| hop.trim().to_string()))
            .filter(|hop| !hop.is_empty());
        let real_ip = header("x-real-ip")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(Self(
            forwarded
                .or(real_ip)
                .or(peer)
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: String,
}

/// A share token from `?token=` that resolved to a user.
pub struct SharedLink(pub ShareAccess);

impl FromRequestParts<AppState> for SharedLink {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Query(query) =
            Query::<TokenQuery>::try_from_uri(&parts.uri).map_err(|_| ApiError::unauthorized())?;
        if query.token.is_empty() {
            return Err(ApiError::unauthorized());
        }
        let access = state.share.validate_token(&query.token).await?;
        Ok(Self(access))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn client_ip(req: Request<()>) -> String {
        let (mut parts, _) = req.into_parts();
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        ip
    }

    #[tokio::test]
    async fn test_client_ip_prefers_forwarded_for() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(client_ip(req).await, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_client_ip_fallbacks() {
        let req = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(client_ip(req).await, "198.51.100.2");

        let mut req = Request::builder().body(()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 9], 4711))));
        assert_eq!(client_ip(req).await, "192.0.2.9");

        let req = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(req).await, "unknown");
    }
}
