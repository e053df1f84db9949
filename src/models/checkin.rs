use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable audit row written on every successful QR check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinRecord {
    pub user_id: Uuid,
    pub venue_id: Uuid,
    pub booking_id: Uuid,
    pub checked_at: DateTime<Utc>,
}
