use axum::{extract::State, http::StatusCode, response::Response, Json};

use crate::{
    error::Result,
    handlers::bookings::json_response,
    state::AppState,
    validation::bookings::{validate_request, PaymentWebhookRequest},
};

/// Payment provider callback confirming a charge.
///
/// Providers deliver callbacks at least once; a repeated `payment_ref` is
/// acknowledged without changing the booking.
#[axum::debug_handler]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(req): Json<PaymentWebhookRequest>,
) -> Result<Response> {
    validate_request(&req)?;
    let booking = state
        .bookings
        .confirm_payment(req.booking_id, &req.payment_ref)
        .await?;

    json_response(
        StatusCode::OK,
        &sonic_rs::json!({
            "booking_id": booking.id.to_string(),
            "state": booking.state.as_str()
        }),
    )
}
