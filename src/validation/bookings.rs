use chrono::{DateTime, Utc};
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// The request payload for booking a venue.
#[derive(Deserialize, Debug, Validate)]
pub struct CreateBookingRequest {
    #[garde(skip)]
    pub venue_id: Uuid,
    /// Product kind name, e.g. `SINGLE_SESSION`.
    #[garde(length(min = 1, max = 32))]
    pub kind: String,
    #[garde(skip)]
    pub scheduled_start: DateTime<Utc>,
    #[garde(skip)]
    pub scheduled_end: DateTime<Utc>,
    #[garde(range(min = 1, max = 100))]
    pub credits: i32,
}

/// The request payload for cancelling a booking.
#[derive(Deserialize, Debug, Validate)]
pub struct CancelBookingRequest {
    /// Client-chosen idempotency key for this cancellation.
    #[garde(length(min = 1, max = 128))]
    pub request_id: String,
    #[garde(length(max = 500))]
    pub reason: Option<String>,
}

/// The request payload sent by a venue scanner.
#[derive(Deserialize, Debug, Validate)]
pub struct ScanRequest {
    #[garde(length(min = 1, max = 512))]
    pub token: String,
    #[garde(skip)]
    pub venue_id: Uuid,
}

/// The payment provider's confirmation callback.
#[derive(Deserialize, Debug, Validate)]
pub struct PaymentWebhookRequest {
    #[garde(skip)]
    pub booking_id: Uuid,
    #[garde(length(min = 1, max = 128))]
    pub payment_ref: String,
}

/// Runs the `garde` rules of a request payload.
///
/// # Arguments
///
/// * `request` - The deserialized payload.
///
/// # Returns
///
/// `AppError::Validation` listing every failed rule.
pub fn validate_request<T>(request: &T) -> Result<()>
where
    T: Validate,
    T::Context: Default,
{
    request
        .validate()
        .map_err(|report| AppError::Validation(report.to_string()))
}
