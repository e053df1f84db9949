use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        booking::{Booking, BookingState, QrStatus},
        checkin::CheckinRecord,
        venue::Venue,
    },
};

/// Fields a transition sets. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_ref: Option<String>,
    pub commission_amount: Option<i64>,
    pub net_partner_amount: Option<i64>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub cancel_request_id: Option<String>,
    pub refund_ref: Option<String>,
    pub refund_attempted_at: Option<DateTime<Utc>>,
    pub qr_token: Option<String>,
    pub qr_nonce: Option<String>,
    pub qr_status: Option<QrStatus>,
    pub qr_issued_at: Option<DateTime<Utc>>,
    pub qr_expires_at: Option<DateTime<Utc>>,
}

impl BookingPatch {
    /// Applies the set fields to `booking` in place.
    pub fn apply(&self, booking: &mut Booking) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set_opt(&mut booking.paid_at, &self.paid_at);
        set_opt(&mut booking.payment_ref, &self.payment_ref);
        set(&mut booking.commission_amount, &self.commission_amount);
        set(&mut booking.net_partner_amount, &self.net_partner_amount);
        set_opt(&mut booking.checked_in_at, &self.checked_in_at);
        set_opt(&mut booking.checked_out_at, &self.checked_out_at);
        set_opt(&mut booking.cancelled_at, &self.cancelled_at);
        set_opt(&mut booking.expired_at, &self.expired_at);
        set_opt(&mut booking.cancelled_by, &self.cancelled_by);
        set_opt(&mut booking.cancel_reason, &self.cancel_reason);
        set_opt(&mut booking.cancel_request_id, &self.cancel_request_id);
        set_opt(&mut booking.refund_ref, &self.refund_ref);
        set_opt(&mut booking.refund_attempted_at, &self.refund_attempted_at);
        set_opt(&mut booking.qr_token, &self.qr_token);
        set_opt(&mut booking.qr_nonce, &self.qr_nonce);
        set_opt(&mut booking.qr_status, &self.qr_status);
        set_opt(&mut booking.qr_issued_at, &self.qr_issued_at);
        set_opt(&mut booking.qr_expires_at, &self.qr_expires_at);
    }
}

/// A guarded, all-or-nothing update of one booking.
///
/// The store applies it only if the booking is currently in one of `from`
/// (and, with `require_nonce`, holds an ACTIVE QR token with that nonce;
/// with `require_unpaid`, has no payment recorded), checking and writing in
/// a single step.
#[derive(Debug, Clone)]
pub struct Transition {
    pub booking_id: Uuid,
    pub from: Vec<BookingState>,
    pub to: BookingState,
    pub require_nonce: Option<String>,
    pub require_unpaid: bool,
    pub patch: BookingPatch,
    /// Audit row written together with the update.
    pub checkin: Option<CheckinRecord>,
}

impl Transition {
    pub fn new(booking_id: Uuid, from: BookingState, to: BookingState) -> Self {
        Self {
            booking_id,
            from: vec![from],
            to,
            require_nonce: None,
            require_unpaid: false,
            patch: BookingPatch::default(),
            checkin: None,
        }
    }

    pub fn with_patch(mut self, patch: BookingPatch) -> Self {
        self.patch = patch;
        self
    }

    pub fn requiring_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.require_nonce = Some(nonce.into());
        self
    }

    pub fn requiring_unpaid(mut self) -> Self {
        self.require_unpaid = true;
        self
    }

    pub fn recording(mut self, checkin: CheckinRecord) -> Self {
        self.checkin = Some(checkin);
        self
    }

    /// Whether `booking` satisfies this transition's guard.
    pub fn guard_holds(&self, booking: &Booking) -> bool {
        if !self.from.contains(&booking.state) {
            return false;
        }
        if self.require_unpaid && booking.payment_ref.is_some() {
            return false;
        }
        match &self.require_nonce {
            None => true,
            Some(nonce) => {
                booking.qr_status == Some(QrStatus::Active)
                    && booking.qr_nonce.as_deref() == Some(nonce.as_str())
            }
        }
    }
}

/// Persistence for bookings, check-ins, and venue lookups.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Stores a new booking.
    async fn insert(&self, booking: &Booking) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>>;

    /// Bookings of a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>>;

    /// Applies `transition` if its guard holds at write time.
    ///
    /// Returns the updated booking, or `None` when the guard failed and
    /// nothing was written.
    async fn transition(&self, transition: Transition) -> Result<Option<Booking>>;

    /// CONFIRMED bookings whose window ended before `now`, and PENDING ones
    /// whose window ended or that were created before `hold_cutoff`.
    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        hold_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>>;

    /// Marks ACTIVE QR tokens past their expiry as EXPIRED. Returns the count.
    async fn expire_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Bookings owing a refund that has not been recorded (see
    /// [`Booking::refund_outstanding`]). Never-attempted refunds come first,
    /// then the least recently attempted.
    async fn find_outstanding_refunds(&self, limit: i64) -> Result<Vec<Booking>>;

    /// Whether any check-in exists for the (user, venue) pair.
    async fn has_checkin(&self, user_id: Uuid, venue_id: Uuid) -> Result<bool>;

    async fn find_venue(&self, venue_id: Uuid) -> Result<Option<Venue>>;
}

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgBookingRepository {
    pool: Pool,
}

impl PgBookingRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

const TRANSITION_SQL: &str = r#"
    WITH updated AS (
        UPDATE bookings
        SET
            state = $3,
            paid_at = COALESCE($5, paid_at),
            payment_ref = COALESCE($6, payment_ref),
            commission_amount = COALESCE($7, commission_amount),
            net_partner_amount = COALESCE($8, net_partner_amount),
            checked_in_at = COALESCE($9, checked_in_at),
            checked_out_at = COALESCE($10, checked_out_at),
            cancelled_at = COALESCE($11, cancelled_at),
            expired_at = COALESCE($12, expired_at),
            cancelled_by = COALESCE($13, cancelled_by),
            cancel_reason = COALESCE($14, cancel_reason),
            cancel_request_id = COALESCE($15, cancel_request_id),
            refund_ref = COALESCE($16, refund_ref),
            qr_token = COALESCE($17, qr_token),
            qr_nonce = COALESCE($18, qr_nonce),
            qr_status = COALESCE($19, qr_status),
            qr_issued_at = COALESCE($20, qr_issued_at),
            qr_expires_at = COALESCE($21, qr_expires_at),
            refund_attempted_at = COALESCE($25, refund_attempted_at),
            updated_at = NOW()
        WHERE id = $1
          AND state = ANY($2)
          AND ($4::text IS NULL OR (qr_status = 'active' AND qr_nonce = $4::text))
          AND (NOT $24::boolean OR payment_ref IS NULL)
        RETURNING *
    ),
    recorded AS (
        INSERT INTO checkins (user_id, venue_id, booking_id, checked_at)
        SELECT user_id, venue_id, id, $23::timestamptz
        FROM updated
        WHERE $22::boolean
    )
    SELECT * FROM updated
"#;

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> Result<()> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                INSERT INTO bookings (
                    id, user_id, venue_id, kind, state, scheduled_start, scheduled_end,
                    created_at, credits_required, price_per_credit, gross_amount,
                    commission_amount, net_partner_amount
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .await?;
        client
            .execute(
                &statement,
                &[
                    &booking.id,
                    &booking.user_id,
                    &booking.venue_id,
                    &booking.kind,
                    &booking.state,
                    &booking.scheduled_start,
                    &booking.scheduled_end,
                    &booking.created_at,
                    &booking.credits_required,
                    &booking.price_per_credit,
                    &booking.gross_amount,
                    &booking.commission_amount,
                    &booking.net_partner_amount,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT * FROM bookings WHERE id = $1")
            .await?;
        let row = client.query_opt(&statement, &[&id]).await?;
        row.as_ref().map(Booking::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                SELECT *
                FROM bookings
                WHERE user_id = $1
                ORDER BY created_at DESC
                "#,
            )
            .await?;
        let rows = client.query(&statement, &[&user_id]).await?;
        rows.iter().map(Booking::try_from).collect()
    }

    async fn transition(&self, transition: Transition) -> Result<Option<Booking>> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(TRANSITION_SQL).await?;

        let Transition {
            booking_id,
            from,
            to,
            require_nonce,
            require_unpaid,
            patch,
            checkin,
        } = transition;
        let record_checkin = checkin.is_some();
        let checked_at = checkin.map(|c| c.checked_at);

        let row = client
            .query_opt(
                &statement,
                &[
                    &booking_id,
                    &from,
                    &to,
                    &require_nonce,
                    &patch.paid_at,
                    &patch.payment_ref,
                    &patch.commission_amount,
                    &patch.net_partner_amount,
                    &patch.checked_in_at,
                    &patch.checked_out_at,
                    &patch.cancelled_at,
                    &patch.expired_at,
                    &patch.cancelled_by,
                    &patch.cancel_reason,
                    &patch.cancel_request_id,
                    &patch.refund_ref,
                    &patch.qr_token,
                    &patch.qr_nonce,
                    &patch.qr_status,
                    &patch.qr_issued_at,
                    &patch.qr_expires_at,
                    &record_checkin,
                    &checked_at,
                    &require_unpaid,
                    &patch.refund_attempted_at,
                ],
            )
            .await?;
        row.as_ref().map(Booking::try_from).transpose()
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        hold_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                SELECT *
                FROM bookings
                WHERE (state = 'confirmed' AND scheduled_end < $1)
                   OR (state = 'pending' AND (scheduled_end < $1 OR created_at < $2))
                ORDER BY scheduled_end ASC
                LIMIT $3
                "#,
            )
            .await?;
        let rows = client
            .query(&statement, &[&now, &hold_cutoff, &limit])
            .await?;
        rows.iter().map(Booking::try_from).collect()
    }

    async fn expire_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                UPDATE bookings
                SET qr_status = 'expired', updated_at = NOW()
                WHERE qr_status = 'active' AND qr_expires_at < $1
                "#,
            )
            .await?;
        Ok(client.execute(&statement, &[&now]).await?)
    }

    async fn find_outstanding_refunds(&self, limit: i64) -> Result<Vec<Booking>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                SELECT *
                FROM bookings
                WHERE (state = 'cancelled' OR (state = 'expired' AND paid_at IS NULL))
                  AND payment_ref IS NOT NULL
                  AND refund_ref IS NULL
                ORDER BY refund_attempted_at ASC NULLS FIRST,
                         COALESCE(cancelled_at, expired_at) ASC
                LIMIT $1
                "#,
            )
            .await?;
        let rows = client.query(&statement, &[&limit]).await?;
        rows.iter().map(Booking::try_from).collect()
    }

    async fn has_checkin(&self, user_id: Uuid, venue_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM checkins WHERE user_id = $1 AND venue_id = $2
                ) AS eligible
                "#,
            )
            .await?;
        let row = client.query_one(&statement, &[&user_id, &venue_id]).await?;
        Ok(row.try_get("eligible")?)
    }

    async fn find_venue(&self, venue_id: Uuid) -> Result<Option<Venue>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT id, name, tier, monthly_price FROM venues WHERE id = $1")
            .await?;
        let row = client.query_opt(&statement, &[&venue_id]).await?;
        row.as_ref().map(Venue::try_from).transpose()
    }
}
