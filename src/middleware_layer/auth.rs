use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use redis::AsyncCommands;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{models::session::Session, state::AppState};

/// Name of the cookie carrying the session id issued by the auth service.
pub const SESSION_COOKIE: &str = "session_id";

fn session_key(session_id: Uuid) -> String {
    format!("session:{}", session_id)
}

/// Resolves the caller's session and stores it as a request extension.
///
/// Sessions are created by the account service; this layer only reads them
/// from Redis and evicts expired ones.
pub async fn require_auth(
    State(mut state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let session_id = cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
        .ok_or_else(|| {
            tracing::debug!("❌ Missing or malformed session cookie");
            StatusCode::UNAUTHORIZED
        })?;

    let session_json: Option<String> = state
        .redis
        .get(session_key(session_id))
        .await
        .map_err(|e| {
            tracing::error!("❌ Redis error while loading session: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    let session_json = session_json.ok_or(StatusCode::UNAUTHORIZED)?;

    let session: Session = sonic_rs::from_str(&session_json).map_err(|e| {
        tracing::warn!("❌ Invalid session JSON: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    if state.bookings.clock().now() > session.expires_at {
        tracing::debug!("Session expired for user {}", session.user_id);
        let _: redis::RedisResult<()> = state.redis.del(session_key(session_id)).await;
        return Err(StatusCode::UNAUTHORIZED);
    }

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}
