//! Axum middleware that puts the authority in front of a router.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use gatehouse_auth::middleware::{SessionPrincipal, require_session};
//!
//! async fn me(SessionPrincipal(principal): SessionPrincipal) -> String {
//!     format!("identity {}", principal.identity_id)
//! }
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(middleware::from_fn_with_state(authority.clone(), require_session));
//! ```

pub mod error;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, USER_AGENT},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::authority::{Admission, Authority, RequestMeta};
use crate::session::Principal;

pub use error::AuthorityRejection;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Rate-limits the request, validates its bearer session, and on success
/// stores the [`Principal`] in the request extensions.
pub async fn require_session(
    State(authority): State<Arc<Authority>>,
    mut request: Request,
    next: Next,
) -> Response {
    let meta = request_meta(&request, authority.trusted_proxies());
    let admission = authority.admit(&meta).await;
    if let Some(rejection) = AuthorityRejection::from_admission(admission) {
        return rejection.into_response();
    }
    if let Admission::Granted(Some(principal)) = admission {
        request.extensions_mut().insert(principal);
    }
    next.run(request).await
}

/// Collects what the authority needs from an HTTP request.
///
/// The client address comes from `ConnectInfo`; forwarding headers are
/// only read when that peer is one of `trusted_proxies`.
pub fn request_meta(request: &Request, trusted_proxies: &[IpAddr]) -> RequestMeta {
    let headers = request.headers();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    RequestMeta {
        bearer: bearer_token(headers),
        client_ip: client_ip(headers, peer, trusted_proxies),
        user_agent: header_str(headers, USER_AGENT.as_str())
            .unwrap_or_default()
            .to_string(),
        endpoint: request.uri().path().to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, AUTHORIZATION.as_str())?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolves the client address.
///
/// Behind a trusted proxy the rightmost `X-Forwarded-For` hop (the one the
/// proxy appended) wins, then `X-Real-IP`. Header values must parse as an
/// address. Any other peer is used as-is; without a peer the result is
/// empty.
fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = peer else {
        tracing::debug!("No peer address on request");
        return String::new();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    header_str(headers, X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next_back())
        .and_then(parse_ip)
        .or_else(|| header_str(headers, X_REAL_IP).and_then(parse_ip))
        .unwrap_or(peer)
        .to_string()
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}

/// Extractor for the principal stored by [`require_session`].
///
/// Rejects with 401 on routes the middleware admitted without a session.
pub struct SessionPrincipal(pub Principal);

impl<S> FromRequestParts<S> for SessionPrincipal
where
    S: Send + Sync,
{
    type Rejection = AuthorityRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .copied()
            .map(SessionPrincipal)
            .ok_or(AuthorityRejection::Unauthorized)
    }
}
