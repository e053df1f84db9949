use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use anyhow::Context;
use http::{HeaderValue, Method, header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropin::{
    config::Config,
    db, handlers, middleware_layer,
    services::sweeper,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    db::apply_schema(&state.db).await?;

    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::COOKIE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86400));

    // Scanners are unauthenticated; throttle per client IP.
    let scan_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(20)
            .use_headers()
            .finish()
            .context("Invalid scan rate limit configuration")?,
    );

    let scan_routes = Router::new()
        .route("/api/checkins/scan", post(handlers::checkins::scan))
        .layer(tower_governor::GovernorLayer::new(scan_governor_conf))
        .with_state(state.clone());

    let webhook_routes = Router::new()
        .route(
            "/api/payments/webhook",
            post(handlers::payments::payment_webhook),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::webhook::verify_webhook_secret,
        ))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/api/bookings",
            post(handlers::bookings::create_booking).get(handlers::bookings::list_bookings),
        )
        .route("/api/bookings/{booking_id}", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/{booking_id}/pay",
            post(handlers::bookings::pay_booking),
        )
        .route(
            "/api/bookings/{booking_id}/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/api/bookings/{booking_id}/checkout",
            post(handlers::bookings::check_out),
        )
        .route(
            "/api/bookings/{booking_id}/qr",
            get(handlers::bookings::get_qr).post(handlers::bookings::reissue_qr),
        )
        .route(
            "/api/venues/{venue_id}/review-eligibility",
            get(handlers::venues::review_eligibility),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    let app = Router::new()
        .merge(scan_routes)
        .merge(webhook_routes)
        .merge(protected_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors);

    tokio::spawn(sweeper::run(
        state.bookings.clone(),
        state.redis.clone(),
        config.sweep_interval_secs,
        config.sweep_batch_size,
    ));
    tracing::info!(
        "✅ Booking sweeper started (every {}s)",
        config.sweep_interval_secs
    );

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
