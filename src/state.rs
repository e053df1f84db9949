use deadpool_postgres::Pool;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::{
    clock::SystemClock,
    config::Config,
    crypto::secrets::{QrSecrets, SecretStore},
    error::Result,
    payment_gateway::MockPaymentGateway,
    repositories::booking::PgBookingRepository,
    services::bookings::BookingService,
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: Pool,
    /// The Redis connection manager.
    pub redis: ConnectionManager,
    /// The application's configuration.
    pub config: Config,
    /// The booking lifecycle service.
    pub bookings: Arc<BookingService>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let secrets = QrSecrets::from_config(config)?;
        if secrets.previous_secret().is_some() {
            tracing::info!("🔐 QR secret rotation window open, previous secret accepted");
        }

        // No card processor is wired in; payments arrive through the webhook.
        let gateway = MockPaymentGateway::new();
        tracing::warn!("⚠️  Using the in-process payment gateway");

        let bookings = BookingService::new(
            Arc::new(PgBookingRepository::new(db.clone())),
            Arc::new(gateway),
            Arc::new(SystemClock),
            Arc::new(secrets),
            config.policy.clone(),
        );
        tracing::info!("✅ Booking service initialized");

        Ok(AppState {
            db,
            redis,
            config: config.clone(),
            bookings: Arc::new(bookings),
        })
    }
}
