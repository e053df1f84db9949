use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// The product a booking grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[postgres(name = "booking_kind")]
pub enum BookingKind {
    #[postgres(name = "single_session")]
    SingleSession,
    #[postgres(name = "daily_pass")]
    DailyPass,
    #[postgres(name = "weekly_pass")]
    WeeklyPass,
    #[postgres(name = "monthly_pass")]
    MonthlyPass,
}

impl BookingKind {
    /// The wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::SingleSession => "SINGLE_SESSION",
            BookingKind::DailyPass => "DAILY_PASS",
            BookingKind::WeeklyPass => "WEEKLY_PASS",
            BookingKind::MonthlyPass => "MONTHLY_PASS",
        }
    }
}

impl FromStr for BookingKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SINGLE_SESSION" => Ok(BookingKind::SingleSession),
            "DAILY_PASS" => Ok(BookingKind::DailyPass),
            "WEEKLY_PASS" => Ok(BookingKind::WeeklyPass),
            "MONTHLY_PASS" => Ok(BookingKind::MonthlyPass),
            other => Err(AppError::Validation(format!("Unknown booking kind: {}", other))),
        }
    }
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a booking.
///
/// `Cancelled` and `Expired` are absorbing and only reachable from
/// `Pending` or `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[postgres(name = "booking_state")]
pub enum BookingState {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "confirmed")]
    Confirmed,
    #[postgres(name = "active")]
    Active,
    #[postgres(name = "completed")]
    Completed,
    #[postgres(name = "cancelled")]
    Cancelled,
    #[postgres(name = "expired")]
    Expired,
}

impl BookingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::Pending => "PENDING",
            BookingState::Confirmed => "CONFIRMED",
            BookingState::Active => "ACTIVE",
            BookingState::Completed => "COMPLETED",
            BookingState::Cancelled => "CANCELLED",
            BookingState::Expired => "EXPIRED",
        }
    }

    /// Whether the booking has been paid for (a QR token may exist).
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            BookingState::Confirmed | BookingState::Active | BookingState::Completed
        )
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the QR token attached to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[postgres(name = "qr_status")]
pub enum QrStatus {
    #[postgres(name = "active")]
    Active,
    #[postgres(name = "used")]
    Used,
    #[postgres(name = "revoked")]
    Revoked,
    #[postgres(name = "expired")]
    Expired,
}

/// The transition a caller attempted, reported when a guard rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    ConfirmPayment,
    CheckIn,
    CheckOut,
    Cancel,
    Expire,
    ReissueQr,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionKind::ConfirmPayment => "confirm_payment",
            TransitionKind::CheckIn => "check_in",
            TransitionKind::CheckOut => "check_out",
            TransitionKind::Cancel => "cancel",
            TransitionKind::Expire => "expire",
            TransitionKind::ReissueQr => "reissue_qr",
        };
        f.write_str(name)
    }
}

/// A single reservation/purchase unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub venue_id: Uuid,
    pub kind: BookingKind,
    pub state: BookingState,
    /// Start of the access window.
    pub scheduled_start: DateTime<Utc>,
    /// End of the access window.
    pub scheduled_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub credits_required: i32,
    /// Price of one credit in minor currency units.
    pub price_per_credit: i64,
    pub gross_amount: i64,
    pub commission_amount: i64,
    pub net_partner_amount: i64,
    /// Gateway reference of the payment that confirmed this booking, or of
    /// one that arrived after it closed and is owed back.
    pub payment_ref: Option<String>,
    pub refund_ref: Option<String>,
    /// Last failed refund attempt.
    pub refund_attempted_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    /// Idempotency key of the cancellation request.
    pub cancel_request_id: Option<String>,
    #[serde(skip_serializing)]
    pub qr_token: Option<String>,
    #[serde(skip_serializing)]
    pub qr_nonce: Option<String>,
    pub qr_status: Option<QrStatus>,
    pub qr_issued_at: Option<DateTime<Utc>>,
    pub qr_expires_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Whether a refund is owed but has not been recorded yet.
    ///
    /// Cancelled bookings return any payment. Expired bookings only return a
    /// payment that arrived after they expired (`paid_at` is never set for
    /// those); an unused confirmed booking keeps its payment.
    pub fn refund_outstanding(&self) -> bool {
        let owes = match self.state {
            BookingState::Cancelled => true,
            BookingState::Expired => self.paid_at.is_none(),
            _ => false,
        };
        owes && self.payment_ref.is_some() && self.refund_ref.is_none()
    }
}

impl TryFrom<&Row> for Booking {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            venue_id: row.try_get("venue_id")?,
            kind: row.try_get("kind")?,
            state: row.try_get("state")?,
            scheduled_start: row.try_get("scheduled_start")?,
            scheduled_end: row.try_get("scheduled_end")?,
            created_at: row.try_get("created_at")?,
            paid_at: row.try_get("paid_at")?,
            checked_in_at: row.try_get("checked_in_at")?,
            checked_out_at: row.try_get("checked_out_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            expired_at: row.try_get("expired_at")?,
            credits_required: row.try_get("credits_required")?,
            price_per_credit: row.try_get("price_per_credit")?,
            gross_amount: row.try_get("gross_amount")?,
            commission_amount: row.try_get("commission_amount")?,
            net_partner_amount: row.try_get("net_partner_amount")?,
            payment_ref: row.try_get("payment_ref")?,
            refund_ref: row.try_get("refund_ref")?,
            refund_attempted_at: row.try_get("refund_attempted_at")?,
            cancelled_by: row.try_get("cancelled_by")?,
            cancel_reason: row.try_get("cancel_reason")?,
            cancel_request_id: row.try_get("cancel_request_id")?,
            qr_token: row.try_get("qr_token")?,
            qr_nonce: row.try_get("qr_nonce")?,
            qr_status: row.try_get("qr_status")?,
            qr_issued_at: row.try_get("qr_issued_at")?,
            qr_expires_at: row.try_get("qr_expires_at")?,
        })
    }
}

/// Input to `BookingService::create`.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: Uuid,
    pub venue_id: Uuid,
    pub kind: BookingKind,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub credits_required: i32,
    pub price_per_credit: i64,
}

/// Split of a gross charge between the platform and the partner venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionSplit {
    pub gross_amount: i64,
    pub commission_amount: i64,
    pub net_partner_amount: i64,
}
