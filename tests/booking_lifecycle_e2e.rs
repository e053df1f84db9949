use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use dropin::{
    clock::FixedClock,
    config::BookingPolicy,
    crypto::secrets::{QrSecrets, SecretKey},
    error::{AppError, VerificationError},
    models::{
        booking::{Booking, BookingKind, BookingState, QrStatus, TransitionKind},
        venue::{Venue, VenueTier},
    },
    payment_gateway::{GatewayResult, MockPaymentGateway, PaymentGateway},
    repositories::memory::MemoryBookingRepository,
    services::{bookings::BookingService, reviews, sweeper},
};

// Shared test context
struct TestContext {
    service: BookingService,
    repo: MemoryBookingRepository,
    clock: FixedClock,
    gateway: MockPaymentGateway,
    user_id: Uuid,
    venue_id: Uuid,
}

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

impl TestContext {
    async fn new(now: &str) -> Self {
        let repo = MemoryBookingRepository::new();
        let clock = FixedClock::new(at(now));
        let gateway = MockPaymentGateway::new();
        let secrets = QrSecrets::new(SecretKey::new(vec![7u8; 32]).unwrap(), None);

        let venue_id = Uuid::new_v4();
        repo.insert_venue(Venue {
            id: venue_id,
            name: "Downtown Iron Gym".to_string(),
            tier: VenueTier::Basic,
            monthly_price: None,
        })
        .await;

        let service = BookingService::new(
            Arc::new(repo.clone()),
            Arc::new(gateway.clone()),
            Arc::new(clock.clone()),
            Arc::new(secrets),
            BookingPolicy::default(),
        );

        Self {
            service,
            repo,
            clock,
            gateway,
            user_id: Uuid::new_v4(),
            venue_id,
        }
    }

    async fn book(&self, start: &str, end: &str) -> Booking {
        self.service
            .create_for_venue(
                self.user_id,
                self.venue_id,
                BookingKind::SingleSession,
                at(start),
                at(end),
                1,
            )
            .await
            .unwrap()
    }

    async fn token(&self, booking_id: Uuid) -> String {
        self.service.qr_token(booking_id, self.user_id).await.unwrap()
    }

    /// A service sharing this context's store and clock whose gateway lets
    /// the pending hold run out, and the sweeper expire the booking, while a
    /// charge is in flight.
    fn with_slow_charges(&self) -> BookingService {
        let gateway = SlowChargeGateway {
            inner: self.gateway.clone(),
            clock: self.clock.clone(),
            sweeper: self.service.clone(),
        };
        BookingService::new(
            Arc::new(self.repo.clone()),
            Arc::new(gateway),
            Arc::new(self.clock.clone()),
            Arc::new(QrSecrets::new(SecretKey::new(vec![7u8; 32]).unwrap(), None)),
            BookingPolicy::default(),
        )
    }
}

struct SlowChargeGateway {
    inner: MockPaymentGateway,
    clock: FixedClock,
    sweeper: BookingService,
}

#[async_trait]
impl PaymentGateway for SlowChargeGateway {
    async fn charge(&self, amount: i64, customer: Uuid, idempotency_key: &str) -> GatewayResult<String> {
        self.clock.advance(Duration::minutes(31));
        let report = sweeper::sweep(&self.sweeper, 100).await.unwrap();
        assert_eq!(report.expired, 1);
        self.inner.charge(amount, customer, idempotency_key).await
    }

    async fn refund(&self, payment_ref: &str, amount: i64, idempotency_key: &str) -> GatewayResult<String> {
        self.inner.refund(payment_ref, amount, idempotency_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_session_happy_path() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;

        // Step 1: Book and pay
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        assert_eq!(booking.state, BookingState::Pending);
        assert_eq!(booking.gross_amount, 50);

        let confirmed = ctx.service.confirm_payment(booking.id, "pay_001").await.unwrap();
        assert_eq!(confirmed.state, BookingState::Confirmed);
        assert_eq!(confirmed.commission_amount, 13);
        assert_eq!(confirmed.net_partner_amount, 37);
        assert_eq!(confirmed.qr_status, Some(QrStatus::Active));
        assert_eq!(confirmed.qr_expires_at, Some(at("2026-03-10T23:59:59.999Z")));

        // Step 2: Check in during the window
        let token = ctx.token(booking.id).await;
        ctx.clock.set(at("2026-03-10T10:05:00Z"));
        let active = ctx.service.check_in(booking.id, &token).await.unwrap();
        assert_eq!(active.state, BookingState::Active);
        assert_eq!(active.qr_status, Some(QrStatus::Used));
        assert_eq!(ctx.repo.checkins().await.len(), 1);

        // Step 3: The same code cannot be used twice
        let second = ctx.service.check_in(booking.id, &token).await;
        assert!(matches!(
            second,
            Err(AppError::InvalidTransition {
                from: BookingState::Active,
                attempted: TransitionKind::CheckIn
            })
        ));
        assert_eq!(ctx.repo.checkins().await.len(), 1);

        // Step 4: Check out
        ctx.clock.advance(Duration::minutes(50));
        let completed = ctx.service.check_out(booking.id).await.unwrap();
        assert_eq!(completed.state, BookingState::Completed);
        assert!(completed.checked_out_at.unwrap() >= completed.checked_in_at.unwrap());
    }

    #[tokio::test]
    async fn test_unused_booking_expires_and_cannot_check_in() {
        let ctx = TestContext::new("2026-03-09T08:00:00Z").await;
        let booking = ctx.book("2026-03-09T10:00:00Z", "2026-03-09T11:00:00Z").await;
        ctx.service.confirm_payment(booking.id, "pay_002").await.unwrap();
        let token = ctx.token(booking.id).await;

        ctx.clock.set(at("2026-03-10T08:00:00Z"));
        let report = sweeper::sweep(&ctx.service, 100).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.failures, 0);

        let expired = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
        assert_eq!(expired.state, BookingState::Expired);
        assert_eq!(expired.qr_status, Some(QrStatus::Expired));
        assert!(expired.expired_at.is_some());

        let result = ctx.service.check_in(booking.id, &token).await;
        assert!(matches!(
            result,
            Err(AppError::InvalidTransition {
                from: BookingState::Expired,
                ..
            })
        ));

        // A no-show keeps no claim on the payment
        assert!(!expired.refund_outstanding());
        let report = sweeper::sweep(&ctx.service, 100).await.unwrap();
        assert_eq!(report.refunds_retried, 0);
        assert_eq!(ctx.gateway.refund_count().await, 0);
    }

    #[tokio::test]
    async fn test_unpaid_booking_expires_after_the_hold() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-12T10:00:00Z", "2026-03-12T11:00:00Z").await;

        ctx.clock.advance(Duration::minutes(29));
        let report = sweeper::sweep(&ctx.service, 100).await.unwrap();
        assert_eq!(report.expired, 0);

        ctx.clock.advance(Duration::minutes(2));
        let report = sweeper::sweep(&ctx.service, 100).await.unwrap();
        assert_eq!(report.expired, 1);

        // Step 1: A late payment is rejected and given back
        let paid_late = ctx.service.confirm_payment(booking.id, "pay_late").await;
        assert!(matches!(
            paid_late,
            Err(AppError::InvalidTransition {
                from: BookingState::Expired,
                attempted: TransitionKind::ConfirmPayment
            })
        ));
        assert_eq!(ctx.gateway.refunded_amount("pay_late").await, 50);

        let stored = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
        assert_eq!(stored.state, BookingState::Expired);
        assert_eq!(stored.payment_ref.as_deref(), Some("pay_late"));
        assert!(stored.refund_ref.is_some());
        assert!(stored.paid_at.is_none());

        // Step 2: A replayed webhook refunds nothing more
        let replay = ctx.service.confirm_payment(booking.id, "pay_late").await.unwrap();
        assert_eq!(replay.state, BookingState::Expired);
        assert_eq!(ctx.gateway.refund_count().await, 1);

        // Step 3: A second stray payment is refunded under its own key
        let stray = ctx.service.confirm_payment(booking.id, "pay_stray").await;
        assert!(matches!(stray, Err(AppError::InvalidTransition { .. })));
        assert_eq!(ctx.gateway.refunded_amount("pay_stray").await, 50);
        assert_eq!(ctx.gateway.refund_count().await, 2);

        let report = sweeper::sweep(&ctx.service, 100).await.unwrap();
        assert_eq!(report.refunds_retried, 0);
    }

    #[tokio::test]
    async fn test_booking_expiring_during_a_charge_is_refunded() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-12T10:00:00Z", "2026-03-12T11:00:00Z").await;
        let slow = ctx.with_slow_charges();

        let result = slow.pay(booking.id, ctx.user_id).await;
        assert!(matches!(
            result,
            Err(AppError::InvalidTransition {
                from: BookingState::Expired,
                attempted: TransitionKind::ConfirmPayment
            })
        ));

        let stored = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
        let payment_ref = stored.payment_ref.clone().unwrap();
        assert_eq!(stored.state, BookingState::Expired);
        assert!(stored.refund_ref.is_some());
        assert_eq!(ctx.gateway.charge_count().await, 1);
        assert_eq!(ctx.gateway.refund_count().await, 1);
        assert_eq!(ctx.gateway.refunded_amount(&payment_ref).await, 50);

        let report = sweeper::sweep(&ctx.service, 100).await.unwrap();
        assert_eq!(report.refunds_retried, 0);
        assert_eq!(ctx.gateway.refund_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancellation_refunds_exactly_once() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;

        // Step 1: Pay through the gateway
        let confirmed = ctx.service.pay(booking.id, ctx.user_id).await.unwrap();
        let payment_ref = confirmed.payment_ref.clone().unwrap();
        assert_eq!(ctx.gateway.charge_count().await, 1);
        let token = ctx.token(booking.id).await;

        // Step 2: Cancel
        let cancelled = ctx
            .service
            .cancel(booking.id, ctx.user_id, "req-1", Some("change of plans".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.state, BookingState::Cancelled);
        assert_eq!(cancelled.qr_status, Some(QrStatus::Revoked));
        assert_eq!(cancelled.cancelled_by, Some(ctx.user_id));
        assert!(cancelled.refund_ref.is_some());
        assert_eq!(ctx.gateway.refund_count().await, 1);
        assert_eq!(ctx.gateway.refunded_amount(&payment_ref).await, 50);

        // Step 3: Retried cancellation is a no-op
        let again = ctx
            .service
            .cancel(booking.id, ctx.user_id, "req-1", None)
            .await
            .unwrap();
        assert_eq!(again.refund_ref, cancelled.refund_ref);
        assert_eq!(ctx.gateway.refund_count().await, 1);

        let other = ctx.service.cancel(booking.id, ctx.user_id, "req-2", None).await;
        assert!(matches!(
            other,
            Err(AppError::InvalidTransition {
                from: BookingState::Cancelled,
                attempted: TransitionKind::Cancel
            })
        ));

        // Step 4: The revoked code no longer admits anyone
        ctx.clock.set(at("2026-03-10T10:05:00Z"));
        let scanned = ctx.service.scan(&token, ctx.venue_id).await;
        assert!(scanned.is_err());
        assert!(ctx.repo.checkins().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refund_is_retried_by_the_sweeper() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        ctx.service.confirm_payment(booking.id, "pay_003").await.unwrap();

        ctx.gateway.fail_next(3).await;
        let result = ctx.service.cancel(booking.id, ctx.user_id, "req-1", None).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));

        let pending = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
        assert_eq!(pending.state, BookingState::Cancelled);
        assert!(pending.refund_outstanding());

        let report = sweeper::sweep(&ctx.service, 100).await.unwrap();
        assert_eq!(report.refunds_retried, 1);
        assert_eq!(ctx.gateway.refund_count().await, 1);
        assert_eq!(ctx.gateway.refunded_amount("pay_003").await, 50);

        let settled = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
        assert!(!settled.refund_outstanding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paying_twice_charges_once() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;

        // Step 1: The first attempt times out and is retried under the same key
        ctx.gateway.fail_next(1).await;
        let first = ctx.service.pay(booking.id, ctx.user_id).await.unwrap();
        assert_eq!(first.state, BookingState::Confirmed);
        let payment_ref = first.payment_ref.clone().unwrap();
        assert_eq!(ctx.gateway.charge_count().await, 1);

        // Step 2: Paying again returns the confirmed booking without a new charge
        let second = ctx.service.pay(booking.id, ctx.user_id).await.unwrap();
        assert_eq!(second.payment_ref.as_deref(), Some(payment_ref.as_str()));
        assert_eq!(second.qr_token, first.qr_token);
        assert_eq!(ctx.gateway.charge_count().await, 1);

        // Step 3: The provider's webhook for the same charge is a replay
        let webhook = ctx.service.confirm_payment(booking.id, &payment_ref).await.unwrap();
        assert_eq!(webhook, second);

        let stranger = ctx.service.pay(booking.id, Uuid::new_v4()).await;
        assert!(matches!(stranger, Err(AppError::Unauthorized)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_refund_does_not_hold_back_others() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let refused = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        let delayed = ctx.book("2026-03-10T12:00:00Z", "2026-03-10T13:00:00Z").await;
        ctx.service.confirm_payment(refused.id, "pay_refused").await.unwrap();
        ctx.service.confirm_payment(delayed.id, "pay_delayed").await.unwrap();

        // Step 1: One refund is declined outright, the other hits an outage
        ctx.gateway.refuse_refunds_of("pay_refused").await;
        let result = ctx.service.cancel(refused.id, ctx.user_id, "req-1", None).await;
        assert!(matches!(result, Err(AppError::PaymentDeclined(_))));

        ctx.clock.advance(Duration::minutes(5));
        ctx.gateway.fail_next(3).await;
        let result = ctx.service.cancel(delayed.id, ctx.user_id, "req-2", None).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));

        // Step 2: The older failure is retried first and declined again
        ctx.clock.advance(Duration::minutes(5));
        let report = sweeper::sweep(&ctx.service, 1).await.unwrap();
        assert_eq!(report.refunds_declined, 1);
        assert_eq!(report.refunds_retried, 0);
        assert_eq!(report.failures, 0);

        // Step 3: The next sweep reaches the other booking
        ctx.clock.advance(Duration::minutes(5));
        let report = sweeper::sweep(&ctx.service, 1).await.unwrap();
        assert_eq!(report.refunds_retried, 1);
        assert_eq!(ctx.gateway.refunded_amount("pay_delayed").await, 50);
        assert_eq!(ctx.gateway.refunded_amount("pay_refused").await, 0);

        let still_owed = ctx.service.get(refused.id, ctx.user_id).await.unwrap();
        assert!(still_owed.refund_outstanding());
        assert!(still_owed.refund_attempted_at.is_some());
    }

    #[tokio::test]
    async fn test_payment_confirmation_is_idempotent() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;

        let first = ctx.service.confirm_payment(booking.id, "pay_004").await.unwrap();
        let replay = ctx.service.confirm_payment(booking.id, "pay_004").await.unwrap();
        assert_eq!(first, replay);

        let different = ctx.service.confirm_payment(booking.id, "pay_005").await;
        assert!(matches!(different, Err(AppError::AlreadyProcessed(id)) if id == booking.id));
    }

    #[tokio::test]
    async fn test_pending_cancellation_issues_no_refund() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;

        let cancelled = ctx
            .service
            .cancel(booking.id, ctx.user_id, "req-1", None)
            .await
            .unwrap();
        assert_eq!(cancelled.state, BookingState::Cancelled);
        assert_eq!(cancelled.qr_status, None);
        assert_eq!(ctx.gateway.refund_count().await, 0);
    }

    #[tokio::test]
    async fn test_only_the_owner_can_cancel() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;

        let result = ctx.service.cancel(booking.id, Uuid::new_v4(), "req-1", None).await;
        assert!(matches!(result, Err(AppError::Unauthorized)));

        let unchanged = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
        assert_eq!(unchanged.state, BookingState::Pending);
    }

    #[tokio::test]
    async fn test_check_in_respects_the_access_window() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        ctx.service.confirm_payment(booking.id, "pay_006").await.unwrap();
        let token = ctx.token(booking.id).await;

        let early = ctx.service.check_in(booking.id, &token).await;
        assert!(matches!(early, Err(AppError::NotYetValid)));

        ctx.clock.set(at("2026-03-10T11:00:01Z"));
        let late = ctx.service.check_in(booking.id, &token).await;
        assert!(matches!(late, Err(AppError::Expired)));

        let unchanged = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
        assert_eq!(unchanged.state, BookingState::Confirmed);
        assert!(ctx.repo.checkins().await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_at_the_wrong_venue_is_rejected() {
        let ctx = TestContext::new("2026-03-10T10:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        ctx.service.confirm_payment(booking.id, "pay_007").await.unwrap();
        let token = ctx.token(booking.id).await;

        let result = ctx.service.scan(&token, Uuid::new_v4()).await;
        assert!(matches!(
            result,
            Err(AppError::Verification(VerificationError::VenueMismatch))
        ));

        let admitted = ctx.service.scan(&token, ctx.venue_id).await.unwrap();
        assert_eq!(admitted.state, BookingState::Active);
    }

    #[tokio::test]
    async fn test_reissued_code_replaces_the_old_one() {
        let ctx = TestContext::new("2026-03-10T10:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        ctx.service.confirm_payment(booking.id, "pay_008").await.unwrap();
        let old_token = ctx.token(booking.id).await;

        let reissued = ctx.service.reissue_qr(booking.id, ctx.user_id).await.unwrap();
        let new_token = reissued.qr_token.clone().unwrap();
        assert_ne!(old_token, new_token);
        assert_eq!(reissued.qr_expires_at, Some(at("2026-03-10T23:59:59.999Z")));

        let stale = ctx.service.check_in(booking.id, &old_token).await;
        assert!(matches!(
            stale,
            Err(AppError::Verification(VerificationError::Revoked))
        ));

        let active = ctx.service.check_in(booking.id, &new_token).await.unwrap();
        assert_eq!(active.state, BookingState::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scans_admit_once() {
        let ctx = TestContext::new("2026-03-10T10:00:00Z").await;

        for round in 1..=25 {
            let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
            ctx.service
                .confirm_payment(booking.id, &format!("pay_scan_{}", round))
                .await
                .unwrap();
            let token = ctx.token(booking.id).await;

            let (first, second) = (ctx.service.clone(), ctx.service.clone());
            let (token_a, token_b) = (token.clone(), token);
            let a = tokio::spawn(async move { first.check_in(booking.id, &token_a).await });
            let b = tokio::spawn(async move { second.check_in(booking.id, &token_b).await });
            let (a, b) = (a.await.unwrap(), b.await.unwrap());

            assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
            assert_eq!(ctx.repo.checkins().await.len(), round);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_payments_confirm_once() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;

        for round in 0..25 {
            let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
            let (first, second) = (ctx.service.clone(), ctx.service.clone());
            let (ref_a, ref_b) = (format!("pay_a_{}", round), format!("pay_b_{}", round));

            let a = {
                let ref_a = ref_a.clone();
                tokio::spawn(async move { first.confirm_payment(booking.id, &ref_a).await })
            };
            let b = {
                let ref_b = ref_b.clone();
                tokio::spawn(async move { second.confirm_payment(booking.id, &ref_b).await })
            };
            let (a, b) = (a.await.unwrap(), b.await.unwrap());

            let winner = match (&a, &b) {
                (Ok(_), Err(AppError::AlreadyProcessed(_))) => ref_a,
                (Err(AppError::AlreadyProcessed(_)), Ok(_)) => ref_b,
                other => panic!("expected one confirmation, got {:?}", other),
            };
            let stored = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
            assert_eq!(stored.state, BookingState::Confirmed);
            assert_eq!(stored.payment_ref, Some(winner));
        }
        assert_eq!(ctx.gateway.refund_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_expiry_racing_a_late_payment_never_keeps_the_money() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;

        for round in 0..25 {
            ctx.clock.set(at("2026-03-10T08:00:00Z"));
            let booking = ctx.book("2026-03-12T10:00:00Z", "2026-03-12T11:00:00Z").await;
            ctx.clock.set(at("2026-03-10T08:31:00Z"));

            let payment_ref = format!("pay_race_{}", round);
            let (expirer, payer) = (ctx.service.clone(), ctx.service.clone());
            let expire = tokio::spawn(async move { expirer.expire(booking.id).await });
            let confirm = {
                let payment_ref = payment_ref.clone();
                tokio::spawn(async move { payer.confirm_payment(booking.id, &payment_ref).await })
            };
            let (expired, confirmed) = (expire.await.unwrap(), confirm.await.unwrap());
            assert!(expired.is_ok() != confirmed.is_ok());

            let stored = ctx.service.get(booking.id, ctx.user_id).await.unwrap();
            assert_eq!(stored.payment_ref.as_deref(), Some(payment_ref.as_str()));
            if confirmed.is_ok() {
                assert_eq!(stored.state, BookingState::Confirmed);
                assert_eq!(ctx.gateway.refunded_amount(&payment_ref).await, 0);
            } else {
                assert_eq!(stored.state, BookingState::Expired);
                assert!(stored.refund_ref.is_some());
                assert_eq!(ctx.gateway.refunded_amount(&payment_ref).await, 50);
            }
        }
    }

    #[tokio::test]
    async fn test_review_eligibility_follows_checkins() {
        let ctx = TestContext::new("2026-03-10T10:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        ctx.service.confirm_payment(booking.id, "pay_010").await.unwrap();

        assert!(!reviews::can_review(&ctx.repo, ctx.user_id, ctx.venue_id).await.unwrap());

        let token = ctx.token(booking.id).await;
        ctx.service.check_in(booking.id, &token).await.unwrap();
        assert!(reviews::can_review(&ctx.repo, ctx.user_id, ctx.venue_id).await.unwrap());

        // A later cancelled booking does not revoke eligibility.
        let later = ctx.book("2026-03-11T10:00:00Z", "2026-03-11T11:00:00Z").await;
        ctx.service.cancel(later.id, ctx.user_id, "req-9", None).await.unwrap();
        assert!(reviews::can_review(&ctx.repo, ctx.user_id, ctx.venue_id).await.unwrap());
        assert!(!reviews::can_review(&ctx.repo, Uuid::new_v4(), ctx.venue_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_booking_json_hides_qr_secrets() {
        let ctx = TestContext::new("2026-03-10T08:00:00Z").await;
        let booking = ctx.book("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z").await;
        let confirmed = ctx.service.confirm_payment(booking.id, "pay_011").await.unwrap();

        let value = serde_json::to_value(&confirmed).unwrap();
        assert_eq!(value["kind"], "SINGLE_SESSION");
        assert_eq!(value["state"], "CONFIRMED");
        assert!(value.get("qr_token").is_none());
        assert!(value.get("qr_nonce").is_none());
    }
}
