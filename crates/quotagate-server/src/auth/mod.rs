pub mod jwt;

use axum::http::{header, HeaderMap};

use quotagate_core::entitlement::Actor;

use jwt::decode_jwt;

/// Resolve the calling actor from an `Authorization: Bearer <jwt>` header.
///
/// Missing, malformed, expired or wrongly signed tokens all yield `None`;
/// the gate turns that into `unauthenticated`.
pub fn resolve_actor(headers: &HeaderMap, secret: &str) -> Option<Actor> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    match decode_jwt(token, secret) {
        Ok(claims) => {
            let actor = Actor::new(claims.sub);
            Some(match claims.email {
                Some(email) => actor.with_email(email),
                None => actor,
            })
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            None
        }
    }
}
