use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{booking::BookingKind, session::Session},
    state::AppState,
    validation::bookings::{validate_request, CancelBookingRequest, CreateBookingRequest},
};

/// Serializes `body` with sonic-rs into a JSON response.
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let json = sonic_rs::to_string(body)
        .map_err(|e| AppError::Internal(format!("Failed to serialize response: {}", e)))?;
    Ok((status, [(axum::http::header::CONTENT_TYPE, "application/json")], json).into_response())
}

/// Books a venue for the session user.
#[axum::debug_handler]
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<Response> {
    validate_request(&req)?;
    let kind: BookingKind = req.kind.parse()?;

    let booking = state
        .bookings
        .create_for_venue(
            session.user_id,
            req.venue_id,
            kind,
            req.scheduled_start,
            req.scheduled_end,
            req.credits,
        )
        .await?;

    json_response(StatusCode::CREATED, &booking)
}

/// Lists the session user's bookings, newest first.
#[axum::debug_handler]
pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response> {
    let bookings = state.bookings.list_for_user(session.user_id).await?;
    json_response(StatusCode::OK, &bookings)
}

#[axum::debug_handler]
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(booking_id): Path<Uuid>,
) -> Result<Response> {
    let booking = state.bookings.get(booking_id, session.user_id).await?;
    json_response(StatusCode::OK, &booking)
}

/// Charges the booking through the payment gateway.
#[axum::debug_handler]
pub async fn pay_booking(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(booking_id): Path<Uuid>,
) -> Result<Response> {
    let booking = state.bookings.pay(booking_id, session.user_id).await?;
    json_response(StatusCode::OK, &booking)
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<CancelBookingRequest>,
) -> Result<Response> {
    validate_request(&req)?;
    let booking = state
        .bookings
        .cancel(booking_id, session.user_id, &req.request_id, req.reason)
        .await?;
    json_response(StatusCode::OK, &booking)
}

#[axum::debug_handler]
pub async fn check_out(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(booking_id): Path<Uuid>,
) -> Result<Response> {
    state.bookings.get(booking_id, session.user_id).await?;
    let booking = state.bookings.check_out(booking_id).await?;
    json_response(StatusCode::OK, &booking)
}

/// The QR credential handed to the booking owner.
#[derive(Serialize)]
struct QrResponse {
    booking_id: Uuid,
    token: String,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Returns the current QR token of a confirmed booking.
#[axum::debug_handler]
pub async fn get_qr(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(booking_id): Path<Uuid>,
) -> Result<Response> {
    let token = state.bookings.qr_token(booking_id, session.user_id).await?;
    let booking = state.bookings.get(booking_id, session.user_id).await?;
    json_response(
        StatusCode::OK,
        &QrResponse {
            booking_id,
            token,
            expires_at: booking.qr_expires_at,
        },
    )
}

/// Replaces the QR token, invalidating the previous one.
#[axum::debug_handler]
pub async fn reissue_qr(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(booking_id): Path<Uuid>,
) -> Result<Response> {
    let booking = state.bookings.reissue_qr(booking_id, session.user_id).await?;
    let token = booking
        .qr_token
        .ok_or_else(|| AppError::Internal("Reissued booking has no QR token".to_string()))?;
    json_response(
        StatusCode::OK,
        &QrResponse {
            booking_id,
            token,
            expires_at: booking.qr_expires_at,
        },
    )
}
