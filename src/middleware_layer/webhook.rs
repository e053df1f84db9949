use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Header the payment provider signs its callbacks with.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Whether `presented` equals the configured secret, in constant time.
pub fn secret_matches(presented: &[u8], expected: &[u8]) -> bool {
    !expected.is_empty() && presented.ct_eq(expected).into()
}

/// Rejects payment callbacks that do not carry the shared webhook secret.
pub async fn verify_webhook_secret(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(WEBHOOK_SECRET_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    if !secret_matches(presented, state.config.payment_webhook_secret.as_bytes()) {
        tracing::warn!("❌ Payment webhook rejected: bad or missing secret");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
