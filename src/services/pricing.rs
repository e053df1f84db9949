use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

use crate::config::PricingTable;
use crate::models::booking::BookingKind;
use crate::models::venue::VenueTier;

/// Days a multi-credit pack stays usable after issuance.
pub const PACK_VALIDITY_DAYS: i64 = 90;
/// Days a monthly pass stays usable after issuance.
pub const MONTHLY_VALIDITY_DAYS: i64 = 30;

/// When a purchased product stops granting access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub valid_to: DateTime<Utc>,
    pub duration_days: i64,
}

/// Price of one credit at a venue, in minor currency units.
///
/// A published monthly subscription price wins over the venue tier.
pub fn price_for(table: &PricingTable, tier: VenueTier, monthly_price_hint: Option<i64>) -> i64 {
    if let Some(monthly) = monthly_price_hint {
        return if monthly < table.low_breakpoint {
            table.basic_price
        } else if monthly <= table.high_breakpoint {
            table.premium_price
        } else {
            table.luxury_price
        };
    }

    match tier {
        VenueTier::Basic | VenueTier::Standard | VenueTier::Unknown => table.basic_price,
        VenueTier::Premium => table.premium_price,
        VenueTier::Luxury | VenueTier::Ultra => table.luxury_price,
    }
}

/// Last millisecond of the calendar day containing `now` in `offset`.
pub fn end_of_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let last_instant = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    offset
        .from_local_datetime(&local_date.and_time(last_instant))
        .single()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(now)
}

/// How long a product of `kind` bought at `now` remains valid.
pub fn validity_window(kind: BookingKind, now: DateTime<Utc>, offset: FixedOffset) -> ValidityWindow {
    match kind {
        BookingKind::SingleSession | BookingKind::DailyPass => ValidityWindow {
            valid_to: end_of_day(now, offset),
            duration_days: 1,
        },
        BookingKind::WeeklyPass => ValidityWindow {
            valid_to: now + Duration::days(PACK_VALIDITY_DAYS),
            duration_days: PACK_VALIDITY_DAYS,
        },
        BookingKind::MonthlyPass => ValidityWindow {
            valid_to: now + Duration::days(MONTHLY_VALIDITY_DAYS),
            duration_days: MONTHLY_VALIDITY_DAYS,
        },
    }
}

/// Like [`validity_window`] for a kind given by name; unrecognized names get
/// the shortest window (end of day).
pub fn validity_window_for_name(name: &str, now: DateTime<Utc>, offset: FixedOffset) -> ValidityWindow {
    let kind = name.parse().unwrap_or(BookingKind::SingleSession);
    validity_window(kind, now, offset)
}
