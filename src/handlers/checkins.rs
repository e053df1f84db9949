use axum::{extract::State, http::StatusCode, response::Response, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::Result,
    handlers::bookings::json_response,
    state::AppState,
    validation::bookings::{validate_request, ScanRequest},
};

/// What the scanner shows after a successful admission.
#[derive(Serialize)]
struct ScanResponse {
    booking_id: Uuid,
    user_id: Uuid,
    checked_in_at: Option<DateTime<Utc>>,
}

/// Admits the holder of a QR token at the scanning venue.
///
/// Every token rejection renders as "invalid code"; the reason is only logged.
#[axum::debug_handler]
pub async fn scan(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<Response> {
    validate_request(&req)?;
    let booking = state.bookings.scan(&req.token, req.venue_id).await?;

    json_response(
        StatusCode::OK,
        &ScanResponse {
            booking_id: booking.id,
            user_id: booking.user_id,
            checked_in_at: booking.checked_in_at,
        },
    )
}
