use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        booking::{Booking, BookingState, QrStatus},
        checkin::CheckinRecord,
        venue::Venue,
    },
    repositories::booking::{BookingRepository, Transition},
};

#[derive(Default)]
struct Tables {
    bookings: HashMap<Uuid, Booking>,
    checkins: Vec<CheckinRecord>,
    venues: HashMap<Uuid, Venue>,
}

/// In-process repository.
///
/// All tables sit behind one lock, so a guarded transition and its check-in
/// row are written atomically, the same way the Postgres statement does it.
#[derive(Clone, Default)]
pub struct MemoryBookingRepository {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a venue for pricing lookups.
    pub async fn insert_venue(&self, venue: Venue) {
        self.tables.write().await.venues.insert(venue.id, venue);
    }

    /// All check-in rows, oldest first.
    pub async fn checkins(&self) -> Vec<CheckinRecord> {
        self.tables.read().await.checkins.clone()
    }
}

#[async_trait]
impl BookingRepository for MemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.bookings.contains_key(&booking.id) {
            return Err(AppError::Validation(format!(
                "Booking {} already exists",
                booking.id
            )));
        }
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn transition(&self, transition: Transition) -> Result<Option<Booking>> {
        let mut tables = self.tables.write().await;
        let Some(booking) = tables.bookings.get_mut(&transition.booking_id) else {
            return Ok(None);
        };
        if !transition.guard_holds(booking) {
            return Ok(None);
        }

        booking.state = transition.to;
        transition.patch.apply(booking);
        let updated = booking.clone();

        if let Some(record) = transition.checkin {
            tables.checkins.push(record);
        }
        Ok(Some(updated))
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        hold_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        let mut stale: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| match b.state {
                BookingState::Confirmed => b.scheduled_end < now,
                BookingState::Pending => b.scheduled_end < now || b.created_at < hold_cutoff,
                _ => false,
            })
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.scheduled_end.cmp(&b.scheduled_end));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn expire_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut count = 0;
        for booking in tables.bookings.values_mut() {
            let stale = booking.qr_status == Some(QrStatus::Active)
                && booking.qr_expires_at.is_some_and(|expires| expires < now);
            if stale {
                booking.qr_status = Some(QrStatus::Expired);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn find_outstanding_refunds(&self, limit: i64) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        let mut owed: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.refund_outstanding())
            .cloned()
            .collect();
        owed.sort_by_key(|b| {
            (
                b.refund_attempted_at.is_some(),
                b.refund_attempted_at,
                b.cancelled_at.or(b.expired_at),
            )
        });
        owed.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(owed)
    }

    async fn has_checkin(&self, user_id: Uuid, venue_id: Uuid) -> Result<bool> {
        Ok(self
            .tables
            .read()
            .await
            .checkins
            .iter()
            .any(|c| c.user_id == user_id && c.venue_id == venue_id))
    }

    async fn find_venue(&self, venue_id: Uuid) -> Result<Option<Venue>> {
        Ok(self.tables.read().await.venues.get(&venue_id).cloned())
    }
}
