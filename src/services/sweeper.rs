use redis::aio::ConnectionManager;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    services::bookings::BookingService,
};

/// Redis key guarding the sweep so only one instance runs it per interval.
pub const SWEEP_LEASE_KEY: &str = "lease:booking-sweeper";

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: u64,
    pub tokens_expired: u64,
    pub refunds_retried: u64,
    /// Refunds the provider refused; they stay owed and are retried after
    /// every other outstanding refund.
    pub refunds_declined: u64,
    pub failures: u64,
}

/// Expires stale bookings, retires stale QR tokens, and retries refunds that
/// failed during cancellation.
///
/// Refunds are taken oldest-attempt first, so one the provider keeps
/// refusing does not hold back the rest.
///
/// A booking that fails to process is logged and counted; the rest of the
/// batch still runs. Losing a race against a concurrent check-in or cancel
/// counts as a failure and leaves the winner's result in place.
pub async fn sweep(service: &BookingService, batch_size: i64) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let now = service.clock().now();
    let hold_cutoff = now - service.policy().pending_hold;
    let repo = service.repository();

    for booking in repo.find_expirable(now, hold_cutoff, batch_size).await? {
        match service.expire(booking.id).await {
            Ok(_) => report.expired += 1,
            Err(e) => {
                tracing::warn!("⚠️  Could not expire booking {}: {}", booking.id, e);
                report.failures += 1;
            }
        }
    }

    report.tokens_expired = repo.expire_stale_tokens(now).await?;

    for booking in repo.find_outstanding_refunds(batch_size).await? {
        let id = booking.id;
        match service.settle_refund(booking).await {
            Ok(_) => report.refunds_retried += 1,
            Err(AppError::PaymentDeclined(reason)) => {
                tracing::warn!("⚠️  Refund for booking {} declined: {}", id, reason);
                report.refunds_declined += 1;
            }
            Err(e) => {
                tracing::warn!("⚠️  Refund retry for booking {} failed: {}", id, e);
                report.failures += 1;
            }
        }
    }

    Ok(report)
}

/// Tries to take the sweep lease for `ttl_secs`. Returns `true` when this
/// instance owns the next sweep.
async fn acquire_lease(redis: &mut ConnectionManager, owner: &str, ttl_secs: u64) -> Result<bool> {
    let reply: Option<String> = redis::cmd("SET")
        .arg(SWEEP_LEASE_KEY)
        .arg(owner)
        .arg("NX")
        .arg("EX")
        .arg(ttl_secs.max(1))
        .query_async(redis)
        .await?;
    Ok(reply.is_some())
}

/// Runs [`sweep`] every `interval_secs` for the lifetime of the process.
pub async fn run(
    service: Arc<BookingService>,
    mut redis: ConnectionManager,
    interval_secs: u64,
    batch_size: i64,
) {
    let owner = Uuid::new_v4().to_string();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        ticker.tick().await;

        match acquire_lease(&mut redis, &owner, interval_secs).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Sweep lease held by another instance, skipping");
                continue;
            }
            Err(e) => {
                tracing::error!("❌ Could not acquire sweep lease: {}", e);
                continue;
            }
        }

        tracing::info!("🧹 Running booking sweep...");
        match sweep(&service, batch_size).await {
            Ok(report) => tracing::info!(
                expired = report.expired,
                tokens_expired = report.tokens_expired,
                refunds_retried = report.refunds_retried,
                refunds_declined = report.refunds_declined,
                failures = report.failures,
                "✅ Sweep completed"
            ),
            Err(e) => tracing::error!("❌ Sweep failed: {}", e),
        }
    }
}
