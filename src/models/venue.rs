use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Commercial tier of a venue, used as the pricing fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueTier {
    Basic,
    Standard,
    Premium,
    Luxury,
    Ultra,
    Unknown,
}

impl VenueTier {
    /// Parses a tier name. Anything unrecognized maps to `Unknown`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "basic" => VenueTier::Basic,
            "standard" => VenueTier::Standard,
            "premium" => VenueTier::Premium,
            "luxury" => VenueTier::Luxury,
            "ultra" => VenueTier::Ultra,
            _ => VenueTier::Unknown,
        }
    }
}

/// A gym or fitness location offering drop-in access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Uuid,
    pub name: String,
    pub tier: VenueTier,
    /// Monthly subscription price in minor currency units, when the venue publishes one.
    pub monthly_price: Option<i64>,
}

impl TryFrom<&Row> for Venue {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let tier: String = row.try_get("tier")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            tier: VenueTier::parse(&tier),
            monthly_price: row.try_get("monthly_price")?,
        })
    }
}
