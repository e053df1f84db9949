use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use anyhow::{Context, Result};
use chrono::{Duration, FixedOffset, Offset, Utc};
use zeroize::{Zeroize, Zeroizing};

/// Minimum length of a QR signing secret in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

/// Price breakpoints and per-credit prices, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingTable {
    /// Monthly prices strictly below this are priced as basic.
    pub low_breakpoint: i64,
    /// Monthly prices up to and including this are priced as premium.
    pub high_breakpoint: i64,
    pub basic_price: i64,
    pub premium_price: i64,
    pub luxury_price: i64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            low_breakpoint: 400,
            high_breakpoint: 800,
            basic_price: 50,
            premium_price: 120,
            luxury_price: 350,
        }
    }
}

/// Business rules consumed by the booking core.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// Platform commission in basis points of the gross amount.
    pub commission_rate_bps: i64,
    /// How long an unpaid booking is held before the sweeper expires it.
    pub pending_hold: Duration,
    /// Offset used to find "end of the current day".
    pub business_offset: FixedOffset,
    pub pricing: PricingTable,
    /// Attempts per gateway call, including the first one.
    pub gateway_max_attempts: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            commission_rate_bps: 2500,
            pending_hold: Duration::minutes(30),
            business_offset: Utc.fix(),
            pricing: PricingTable::default(),
            gateway_max_attempts: 3,
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Current QR signing secret.
    pub qr_secret: Zeroizing<Vec<u8>>,
    /// Secret accepted during a rotation window.
    pub qr_previous_secret: Option<Zeroizing<Vec<u8>>>,
    /// Shared secret the payment provider sends with webhooks.
    pub payment_webhook_secret: Zeroizing<String>,
    /// Seconds between sweeper runs.
    pub sweep_interval_secs: u64,
    /// Maximum bookings the sweeper loads per run.
    pub sweep_batch_size: i64,
    pub policy: BookingPolicy,
}

fn decode_secret(var: &str, mut hex_value: String) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = hex::decode(&hex_value)
        .with_context(|| format!("{} must be valid hexadecimal", var))?;
    hex_value.zeroize();

    if bytes.len() < MIN_SECRET_BYTES {
        anyhow::bail!(
            "{} must be at least {} bytes ({} hex characters)",
            var,
            MIN_SECRET_BYTES,
            MIN_SECRET_BYTES * 2
        );
    }
    Ok(Zeroizing::new(bytes))
}

fn parse_or<T>(var: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", var))
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let qr_secret = decode_secret(
            "QR_SECRET",
            env::var("QR_SECRET")
                .context("QR_SECRET must be set (generate with: openssl rand -hex 32)")?,
        )?;

        let qr_previous_secret = match env::var("QR_PREVIOUS_SECRET") {
            Ok(value) if !value.is_empty() => Some(decode_secret("QR_PREVIOUS_SECRET", value)?),
            _ => None,
        };

        let commission_rate_bps: i64 = parse_or("COMMISSION_RATE_BPS", "2500")?;
        if !(0..=10_000).contains(&commission_rate_bps) {
            anyhow::bail!("COMMISSION_RATE_BPS must be between 0 and 10000");
        }

        let offset_minutes: i32 = parse_or("BUSINESS_UTC_OFFSET_MINUTES", "0")?;
        let business_offset = FixedOffset::east_opt(offset_minutes * 60)
            .context("BUSINESS_UTC_OFFSET_MINUTES is out of range")?;

        let gateway_max_attempts: u32 = parse_or("GATEWAY_MAX_ATTEMPTS", "3")?;
        if gateway_max_attempts == 0 {
            anyhow::bail!("GATEWAY_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: parse_or("BIND_ADDR", "127.0.0.1:3000")?,
            qr_secret,
            qr_previous_secret,
            payment_webhook_secret: Zeroizing::new(
                env::var("PAYMENT_WEBHOOK_SECRET")
                    .context("PAYMENT_WEBHOOK_SECRET must be set")?,
            ),
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", "300")?,
            sweep_batch_size: parse_or("SWEEP_BATCH_SIZE", "200")?,
            policy: BookingPolicy {
                commission_rate_bps,
                pending_hold: Duration::minutes(parse_or("PENDING_HOLD_MINUTES", "30")?),
                business_offset,
                pricing: PricingTable::default(),
                gateway_max_attempts,
            },
        })
    }
}
