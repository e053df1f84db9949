use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::BookingPolicy,
    crypto::{
        nonce::generate_qr_nonce,
        qr::{self, QrPayload},
        secrets::SecretStore,
    },
    error::{AppError, Result, VerificationError},
    models::{
        booking::{Booking, BookingKind, BookingState, NewBooking, QrStatus, TransitionKind},
        checkin::CheckinRecord,
    },
    payment_gateway::{PaymentGateway, with_retries},
    repositories::booking::{BookingPatch, BookingRepository, Transition},
    services::{commission, pricing},
};

/// Freshly minted QR credentials for a booking.
struct IssuedQr {
    token: String,
    nonce: String,
    expires_at: DateTime<Utc>,
}

/// The booking state machine.
///
/// Every state change goes through [`BookingRepository::transition`], a
/// conditional update that re-checks the current state at write time. Two
/// concurrent callers can therefore never both win the same transition; the
/// loser re-reads the booking and gets a typed error.
#[derive(Clone)]
pub struct BookingService {
    repo: Arc<dyn BookingRepository>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    secrets: Arc<dyn SecretStore>,
    policy: BookingPolicy,
}

impl BookingService {
    pub fn new(
        repo: Arc<dyn BookingRepository>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        secrets: Arc<dyn SecretStore>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            repo,
            gateway,
            clock,
            secrets,
            policy,
        }
    }

    pub fn repository(&self) -> &dyn BookingRepository {
        self.repo.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    async fn load(&self, id: Uuid) -> Result<Booking> {
        self.repo.find_by_id(id).await?.ok_or(AppError::NotFound)
    }

    /// Re-reads a booking after a lost conditional update and reports its
    /// current state.
    async fn lost_race(&self, id: Uuid, attempted: TransitionKind) -> AppError {
        match self.repo.find_by_id(id).await {
            Ok(Some(current)) => AppError::InvalidTransition {
                from: current.state,
                attempted,
            },
            Ok(None) => AppError::NotFound,
            Err(e) => e,
        }
    }

    fn ensure_owner(booking: &Booking, actor: Uuid) -> Result<()> {
        if booking.user_id != actor {
            tracing::warn!("❌ User {} is not the owner of booking {}", actor, booking.id);
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }

    fn issue_qr(&self, booking: &Booking, expires_at: DateTime<Utc>) -> Result<IssuedQr> {
        let nonce = generate_qr_nonce();
        let payload = QrPayload::new(
            booking.id,
            booking.user_id,
            booking.venue_id,
            booking.scheduled_start,
            expires_at,
            nonce.clone(),
        );
        let token = qr::mint(&payload, self.secrets.current_secret())?;
        Ok(IssuedQr {
            token,
            nonce,
            expires_at,
        })
    }

    /// Creates a PENDING booking.
    pub async fn create(&self, request: NewBooking) -> Result<Booking> {
        if request.scheduled_end <= request.scheduled_start {
            return Err(AppError::Validation(
                "Scheduled end must be after scheduled start".to_string(),
            ));
        }
        let single_day = matches!(
            request.kind,
            BookingKind::SingleSession | BookingKind::DailyPass
        );
        if single_day
            && request.scheduled_end
                > pricing::end_of_day(request.scheduled_start, self.policy.business_offset)
        {
            return Err(AppError::Validation(
                "A single-day booking must end on the day it starts".to_string(),
            ));
        }
        if request.credits_required <= 0 {
            return Err(AppError::Validation(
                "At least one credit is required".to_string(),
            ));
        }
        if request.price_per_credit <= 0 {
            return Err(AppError::Validation(
                "Price per credit must be positive".to_string(),
            ));
        }
        let gross_amount = i64::from(request.credits_required)
            .checked_mul(request.price_per_credit)
            .ok_or_else(|| AppError::Validation("Booking amount is too large".to_string()))?;
        let split = commission::split(gross_amount, self.policy.commission_rate_bps)?;

        let booking = Booking {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            venue_id: request.venue_id,
            kind: request.kind,
            state: BookingState::Pending,
            scheduled_start: request.scheduled_start,
            scheduled_end: request.scheduled_end,
            created_at: self.clock.now(),
            paid_at: None,
            checked_in_at: None,
            checked_out_at: None,
            cancelled_at: None,
            expired_at: None,
            credits_required: request.credits_required,
            price_per_credit: request.price_per_credit,
            gross_amount,
            commission_amount: split.commission_amount,
            net_partner_amount: split.net_partner_amount,
            payment_ref: None,
            refund_ref: None,
            refund_attempted_at: None,
            cancelled_by: None,
            cancel_reason: None,
            cancel_request_id: None,
            qr_token: None,
            qr_nonce: None,
            qr_status: None,
            qr_issued_at: None,
            qr_expires_at: None,
        };

        self.repo.insert(&booking).await?;
        tracing::info!(
            booking_id = %booking.id,
            user_id = %booking.user_id,
            venue_id = %booking.venue_id,
            gross_amount = booking.gross_amount,
            "✅ Booking created"
        );
        Ok(booking)
    }

    /// Creates a PENDING booking priced from the venue's published rates.
    pub async fn create_for_venue(
        &self,
        user_id: Uuid,
        venue_id: Uuid,
        kind: BookingKind,
        scheduled_start: DateTime<Utc>,
        scheduled_end: DateTime<Utc>,
        credits_required: i32,
    ) -> Result<Booking> {
        let venue = self
            .repo
            .find_venue(venue_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let price_per_credit =
            pricing::price_for(&self.policy.pricing, venue.tier, venue.monthly_price);

        self.create(NewBooking {
            user_id,
            venue_id,
            kind,
            scheduled_start,
            scheduled_end,
            credits_required,
            price_per_credit,
        })
        .await
    }

    /// Records a successful payment, fixes the commission split, and mints the QR token.
    ///
    /// Replaying the same `payment_ref` returns the stored booking unchanged.
    /// A payment that lands on a booking already CANCELLED or EXPIRED is
    /// refunded and reported as `InvalidTransition`.
    pub async fn confirm_payment(&self, id: Uuid, payment_ref: &str) -> Result<Booking> {
        if payment_ref.trim().is_empty() {
            return Err(AppError::Validation("Payment reference is required".to_string()));
        }

        let booking = self.load(id).await?;
        if booking.state != BookingState::Pending {
            return self.payment_on_settled(booking, payment_ref).await;
        }

        let now = self.clock.now();
        let split = commission::split(booking.gross_amount, self.policy.commission_rate_bps)?;
        let window = pricing::validity_window(
            booking.kind,
            now.max(booking.scheduled_start),
            self.policy.business_offset,
        );
        let issued = self.issue_qr(&booking, window.valid_to)?;

        let transition = Transition::new(id, BookingState::Pending, BookingState::Confirmed)
            .with_patch(BookingPatch {
                paid_at: Some(now),
                payment_ref: Some(payment_ref.to_string()),
                commission_amount: Some(split.commission_amount),
                net_partner_amount: Some(split.net_partner_amount),
                qr_token: Some(issued.token),
                qr_nonce: Some(issued.nonce),
                qr_status: Some(QrStatus::Active),
                qr_issued_at: Some(now),
                qr_expires_at: Some(issued.expires_at),
                ..BookingPatch::default()
            });

        match self.repo.transition(transition).await? {
            Some(confirmed) => {
                tracing::info!(
                    booking_id = %id,
                    commission = confirmed.commission_amount,
                    net_partner = confirmed.net_partner_amount,
                    "✅ Payment confirmed, QR issued"
                );
                Ok(confirmed)
            }
            None => {
                // Another request confirmed, cancelled, or expired the booking first.
                let current = self.load(id).await?;
                self.payment_on_settled(current, payment_ref).await
            }
        }
    }

    /// Outcome for a payment on a booking that has left PENDING.
    async fn payment_on_settled(&self, booking: Booking, payment_ref: &str) -> Result<Booking> {
        if booking.payment_ref.as_deref() == Some(payment_ref) {
            tracing::debug!("Payment {} already applied to booking {}", payment_ref, booking.id);
            return Ok(booking);
        }
        match booking.state {
            BookingState::Pending => {
                Err(self.lost_race(booking.id, TransitionKind::ConfirmPayment).await)
            }
            state if state.is_paid() => {
                tracing::warn!(
                    "⚠️  Booking {} already paid with a different reference",
                    booking.id
                );
                Err(AppError::AlreadyProcessed(booking.id))
            }
            state => {
                self.return_orphaned_payment(&booking, payment_ref).await?;
                Err(AppError::InvalidTransition {
                    from: state,
                    attempted: TransitionKind::ConfirmPayment,
                })
            }
        }
    }

    /// Gives back money captured for a booking that can no longer be used.
    ///
    /// The first such payment is stored on the row and refunded through
    /// [`Self::settle_refund`], so the sweeper finishes it if the gateway is
    /// down. Any further payment is refunded on the spot under its own key.
    async fn return_orphaned_payment(&self, booking: &Booking, payment_ref: &str) -> Result<()> {
        tracing::warn!(
            booking_id = %booking.id,
            state = %booking.state,
            payment_ref = %payment_ref,
            "⚠️  Payment arrived for a closed booking, refunding"
        );

        if booking.payment_ref.is_none() {
            let transition = Transition::new(booking.id, booking.state, booking.state)
                .requiring_unpaid()
                .with_patch(BookingPatch {
                    payment_ref: Some(payment_ref.to_string()),
                    ..BookingPatch::default()
                });
            if let Some(recorded) = self.repo.transition(transition).await? {
                if let Err(e) = self.settle_refund(recorded).await {
                    tracing::warn!(
                        "⚠️  Refund for booking {} left to the sweeper: {}",
                        booking.id,
                        e
                    );
                }
                return Ok(());
            }
        }

        let key = format!("refund:{}:{}", booking.id, payment_ref);
        let refund_ref = with_retries(self.policy.gateway_max_attempts, || {
            self.gateway.refund(payment_ref, booking.gross_amount, &key)
        })
        .await?;
        tracing::info!(
            booking_id = %booking.id,
            refund_ref = %refund_ref,
            "💸 Unrecorded payment refunded"
        );
        Ok(())
    }

    /// Charges the booking owner through the gateway and confirms the booking.
    ///
    /// The charge uses the idempotency key `charge:{booking_id}`, so repeating
    /// this call never charges twice.
    pub async fn pay(&self, id: Uuid, actor: Uuid) -> Result<Booking> {
        let booking = self.load(id).await?;
        Self::ensure_owner(&booking, actor)?;

        match booking.state {
            BookingState::Pending => {}
            state if state.is_paid() => return Ok(booking),
            state => {
                return Err(AppError::InvalidTransition {
                    from: state,
                    attempted: TransitionKind::ConfirmPayment,
                });
            }
        }

        let key = format!("charge:{}", booking.id);
        let payment_ref = with_retries(self.policy.gateway_max_attempts, || {
            self.gateway.charge(booking.gross_amount, booking.user_id, &key)
        })
        .await?;

        self.confirm_payment(id, &payment_ref).await
    }

    /// Returns the active QR token of a CONFIRMED booking to its owner.
    pub async fn qr_token(&self, id: Uuid, actor: Uuid) -> Result<String> {
        let booking = self.load(id).await?;
        Self::ensure_owner(&booking, actor)?;

        if booking.state != BookingState::Confirmed {
            return Err(AppError::InvalidTransition {
                from: booking.state,
                attempted: TransitionKind::CheckIn,
            });
        }
        match (booking.qr_status, booking.qr_token) {
            (Some(QrStatus::Active), Some(token)) => Ok(token),
            _ => Err(AppError::Verification(VerificationError::Revoked)),
        }
    }

    /// Replaces the QR token of a CONFIRMED booking. The previous token stops
    /// working because its nonce no longer matches.
    pub async fn reissue_qr(&self, id: Uuid, actor: Uuid) -> Result<Booking> {
        let booking = self.load(id).await?;
        Self::ensure_owner(&booking, actor)?;
        if booking.state != BookingState::Confirmed {
            return Err(AppError::InvalidTransition {
                from: booking.state,
                attempted: TransitionKind::ReissueQr,
            });
        }

        let now = self.clock.now();
        // A reissue never extends the access granted by the original purchase.
        let expires_at = match booking.qr_expires_at {
            Some(expires_at) => expires_at,
            None => {
                pricing::validity_window(
                    booking.kind,
                    now.max(booking.scheduled_start),
                    self.policy.business_offset,
                )
                .valid_to
            }
        };
        if now > expires_at {
            return Err(AppError::Expired);
        }
        let issued = self.issue_qr(&booking, expires_at)?;

        let transition = Transition::new(id, BookingState::Confirmed, BookingState::Confirmed)
            .with_patch(BookingPatch {
                qr_token: Some(issued.token),
                qr_nonce: Some(issued.nonce),
                qr_status: Some(QrStatus::Active),
                qr_issued_at: Some(now),
                qr_expires_at: Some(issued.expires_at),
                ..BookingPatch::default()
            });

        match self.repo.transition(transition).await? {
            Some(updated) => {
                tracing::info!(booking_id = %id, "🔁 QR token reissued");
                Ok(updated)
            }
            None => Err(self.lost_race(id, TransitionKind::ReissueQr).await),
        }
    }

    /// Admits the holder of `presented_token` to the venue.
    ///
    /// The state guard, token nonce, and QR status are re-checked in the same
    /// conditional update that marks the token USED, so a token admits at most
    /// one person even under concurrent scans.
    pub async fn check_in(&self, id: Uuid, presented_token: &str) -> Result<Booking> {
        let booking = self.load(id).await?;
        if booking.state != BookingState::Confirmed {
            return Err(AppError::InvalidTransition {
                from: booking.state,
                attempted: TransitionKind::CheckIn,
            });
        }

        let now = self.clock.now();
        let payload = qr::verify(presented_token, self.secrets.as_ref(), now)?;
        if payload.booking_id != booking.id {
            return Err(VerificationError::BookingMismatch.into());
        }
        let nonce_current = booking.qr_status == Some(QrStatus::Active)
            && booking.qr_nonce.as_deref() == Some(payload.nonce.as_str());
        if !nonce_current {
            return Err(VerificationError::Revoked.into());
        }

        if now < booking.scheduled_start {
            return Err(AppError::NotYetValid);
        }
        if now > booking.scheduled_end {
            return Err(AppError::Expired);
        }

        let transition = Transition::new(id, BookingState::Confirmed, BookingState::Active)
            .requiring_nonce(payload.nonce)
            .with_patch(BookingPatch {
                checked_in_at: Some(now),
                qr_status: Some(QrStatus::Used),
                ..BookingPatch::default()
            })
            .recording(CheckinRecord {
                user_id: booking.user_id,
                venue_id: booking.venue_id,
                booking_id: booking.id,
                checked_at: now,
            });

        match self.repo.transition(transition).await? {
            Some(active) => {
                tracing::info!(
                    booking_id = %id,
                    venue_id = %active.venue_id,
                    "✅ Checked in"
                );
                Ok(active)
            }
            None => {
                let current = self.load(id).await?;
                if current.state != BookingState::Confirmed {
                    Err(AppError::InvalidTransition {
                        from: current.state,
                        attempted: TransitionKind::CheckIn,
                    })
                } else {
                    Err(VerificationError::Revoked.into())
                }
            }
        }
    }

    /// Scanner entry point: verifies the token, checks it belongs to the
    /// scanning venue, and checks the booking in.
    pub async fn scan(&self, presented_token: &str, venue_id: Uuid) -> Result<Booking> {
        let payload = qr::verify(presented_token, self.secrets.as_ref(), self.clock.now())?;
        if payload.venue_id != venue_id {
            return Err(VerificationError::VenueMismatch.into());
        }
        self.check_in(payload.booking_id, presented_token).await
    }

    /// Ends the visit of an ACTIVE booking.
    pub async fn check_out(&self, id: Uuid) -> Result<Booking> {
        let booking = self.load(id).await?;
        if booking.state != BookingState::Active {
            return Err(AppError::InvalidTransition {
                from: booking.state,
                attempted: TransitionKind::CheckOut,
            });
        }

        let now = self.clock.now();
        let checked_out_at = booking.checked_in_at.map_or(now, |checked_in| now.max(checked_in));
        let transition = Transition::new(id, BookingState::Active, BookingState::Completed)
            .with_patch(BookingPatch {
                checked_out_at: Some(checked_out_at),
                ..BookingPatch::default()
            });

        match self.repo.transition(transition).await? {
            Some(completed) => {
                tracing::info!(booking_id = %id, "✅ Checked out");
                Ok(completed)
            }
            None => Err(self.lost_race(id, TransitionKind::CheckOut).await),
        }
    }

    /// Cancels a PENDING or CONFIRMED booking on behalf of its owner.
    ///
    /// `request_id` is the idempotency key of the cancellation: repeating it
    /// returns the cancelled booking, finishing a refund that failed earlier.
    /// A confirmed booking's QR token is revoked and its payment refunded once.
    pub async fn cancel(
        &self,
        id: Uuid,
        actor: Uuid,
        request_id: &str,
        reason: Option<String>,
    ) -> Result<Booking> {
        if request_id.trim().is_empty() {
            return Err(AppError::Validation(
                "Cancellation request id is required".to_string(),
            ));
        }

        let booking = self.load(id).await?;
        Self::ensure_owner(&booking, actor)?;

        match booking.state {
            BookingState::Pending | BookingState::Confirmed => {}
            BookingState::Cancelled
                if booking.cancel_request_id.as_deref() == Some(request_id) =>
            {
                return self.finish_cancellation(booking).await;
            }
            state => {
                return Err(AppError::InvalidTransition {
                    from: state,
                    attempted: TransitionKind::Cancel,
                });
            }
        }

        let now = self.clock.now();
        let mut patch = BookingPatch {
            cancelled_at: Some(now),
            cancelled_by: Some(actor),
            cancel_reason: reason,
            cancel_request_id: Some(request_id.to_string()),
            ..BookingPatch::default()
        };
        if booking.qr_status == Some(QrStatus::Active) {
            patch.qr_status = Some(QrStatus::Revoked);
        }
        let transition =
            Transition::new(id, booking.state, BookingState::Cancelled).with_patch(patch);

        match self.repo.transition(transition).await? {
            Some(cancelled) => {
                tracing::info!(
                    booking_id = %id,
                    from = %booking.state,
                    "🗑️  Booking cancelled"
                );
                self.finish_cancellation(cancelled).await
            }
            None => {
                let current = self.load(id).await?;
                if current.state == BookingState::Cancelled
                    && current.cancel_request_id.as_deref() == Some(request_id)
                {
                    self.finish_cancellation(current).await
                } else {
                    Err(AppError::InvalidTransition {
                        from: current.state,
                        attempted: TransitionKind::Cancel,
                    })
                }
            }
        }
    }

    async fn finish_cancellation(&self, booking: Booking) -> Result<Booking> {
        if booking.refund_outstanding() {
            self.settle_refund(booking).await
        } else {
            Ok(booking)
        }
    }

    /// Refunds a booking that holds money it can no longer use and records
    /// the refund reference.
    ///
    /// Uses the idempotency key `refund:{booking_id}`; calling it again after a
    /// partial failure cannot refund twice. A failed attempt is timestamped so
    /// the sweeper moves on to other refunds first.
    pub async fn settle_refund(&self, booking: Booking) -> Result<Booking> {
        if !booking.refund_outstanding() {
            return Ok(booking);
        }
        let Some(payment_ref) = booking.payment_ref.clone() else {
            return Ok(booking);
        };

        let key = format!("refund:{}", booking.id);
        let refunded = with_retries(self.policy.gateway_max_attempts, || {
            self.gateway.refund(&payment_ref, booking.gross_amount, &key)
        })
        .await;

        let refund_ref = match refunded {
            Ok(refund_ref) => refund_ref,
            Err(e) => {
                tracing::error!("❌ Refund for booking {} failed: {}", booking.id, e);
                let attempt = Transition::new(booking.id, booking.state, booking.state)
                    .with_patch(BookingPatch {
                        refund_attempted_at: Some(self.clock.now()),
                        ..BookingPatch::default()
                    });
                self.repo.transition(attempt).await?;
                return Err(e.into());
            }
        };

        let transition = Transition::new(booking.id, booking.state, booking.state)
            .with_patch(BookingPatch {
                refund_ref: Some(refund_ref.clone()),
                ..BookingPatch::default()
            });

        match self.repo.transition(transition).await? {
            Some(refunded) => {
                tracing::info!(
                    booking_id = %booking.id,
                    refund_ref = %refund_ref,
                    amount = booking.gross_amount,
                    "💸 Refund issued"
                );
                Ok(refunded)
            }
            None => Err(self.lost_race(booking.id, TransitionKind::Cancel).await),
        }
    }

    /// Moves a stale PENDING or CONFIRMED booking to EXPIRED.
    ///
    /// Allowed once the access window has ended, or for unpaid bookings once
    /// the pending hold has elapsed.
    pub async fn expire(&self, id: Uuid) -> Result<Booking> {
        let booking = self.load(id).await?;
        let now = self.clock.now();

        let due = match booking.state {
            BookingState::Confirmed => now > booking.scheduled_end,
            BookingState::Pending => {
                now > booking.scheduled_end
                    || now >= booking.created_at + self.policy.pending_hold
            }
            _ => false,
        };
        if !due {
            return Err(AppError::InvalidTransition {
                from: booking.state,
                attempted: TransitionKind::Expire,
            });
        }

        let mut patch = BookingPatch {
            expired_at: Some(now),
            ..BookingPatch::default()
        };
        if booking.qr_status == Some(QrStatus::Active) {
            patch.qr_status = Some(QrStatus::Expired);
        }
        let transition =
            Transition::new(id, booking.state, BookingState::Expired).with_patch(patch);

        match self.repo.transition(transition).await? {
            Some(expired) => {
                tracing::info!(booking_id = %id, from = %booking.state, "⏰ Booking expired");
                Ok(expired)
            }
            None => Err(self.lost_race(id, TransitionKind::Expire).await),
        }
    }

    /// Fetches a booking visible to `actor`.
    pub async fn get(&self, id: Uuid, actor: Uuid) -> Result<Booking> {
        let booking = self.load(id).await?;
        Self::ensure_owner(&booking, actor)?;
        Ok(booking)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        self.repo.list_for_user(user_id).await
    }
}
