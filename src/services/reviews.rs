use uuid::Uuid;

use crate::{error::Result, repositories::booking::BookingRepository};

/// Whether `user_id` may review `venue_id`.
///
/// A user qualifies once they have checked in at the venue at least once;
/// cancelling or expiring later bookings does not take that away.
pub async fn can_review(repo: &dyn BookingRepository, user_id: Uuid, venue_id: Uuid) -> Result<bool> {
    let eligible = repo.has_checkin(user_id, venue_id).await?;
    tracing::debug!(
        user_id = %user_id,
        venue_id = %venue_id,
        eligible,
        "Review eligibility checked"
    );
    Ok(eligible)
}
