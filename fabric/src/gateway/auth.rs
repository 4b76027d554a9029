//! Upgrade-time identity for the gateway (`spec.md` §4.3/§7e).
//!
//! No deep authorization is performed here — identity is asserted by an
//! upstream gateway that has already validated it (`spec.md` §7's error
//! taxonomy treats missing authorization as invalid input at the edge, not a
//! deep check this crate is responsible for).

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{StatusCode, request::Parts},
};
use serde::Deserialize;

/// The user id asserted for this upgrade request: a trusted `X-User-Id`
/// header, or a `user_id` query parameter as a browser-compatible fallback
/// for clients that cannot set headers on a WebSocket handshake.
#[derive(Debug, Clone)]
pub struct AuthenticatedUserId(pub String);

#[derive(Debug, Deserialize)]
struct UserIdQuery {
    user_id: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(header_value) = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
        {
            return Ok(Self(header_value.to_string()));
        }

        let Query(query) = Query::<UserIdQuery>::from_request_parts(parts, state)
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "missing user identity"))?;

        query
            .user_id
            .filter(|s| !s.is_empty())
            .map(Self)
            .ok_or((StatusCode::UNAUTHORIZED, "missing user identity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn prefers_header_over_query() {
        let req = Request::builder()
            .uri("/ws?user_id=from-query")
            .header("X-User-Id", "from-header")
            .body(())
            .expect("valid request");
        let (mut parts, _) = req.into_parts();
        let id = AuthenticatedUserId::from_request_parts(&mut parts, &())
            .await
            .expect("should extract");
        assert_eq!(id.0, "from-header");
    }

    #[tokio::test]
    async fn falls_back_to_query() {
        let req = Request::builder()
            .uri("/ws?user_id=from-query")
            .body(())
            .expect("valid request");
        let (mut parts, _) = req.into_parts();
        let id = AuthenticatedUserId::from_request_parts(&mut parts, &())
            .await
            .expect("should extract");
        assert_eq!(id.0, "from-query");
    }

    #[tokio::test]
    async fn rejects_when_both_absent() {
        let req = Request::builder().uri("/ws").body(()).expect("valid request");
        let (mut parts, _) = req.into_parts();
        let result = AuthenticatedUserId::from_request_parts(&mut parts, &()).await;
        assert!(result.is_err());
    }
}
