pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod payment_gateway;
pub mod state;

pub mod crypto {
    pub mod nonce;
    pub mod qr;
    pub mod secrets;
}

pub mod models {
    pub mod booking;
    pub mod checkin;
    pub mod session;
    pub mod venue;
}

pub mod repositories {
    pub mod booking;
    pub mod memory;
}

pub mod services {
    pub mod bookings;
    pub mod commission;
    pub mod pricing;
    pub mod reviews;
    pub mod sweeper;
}

pub mod handlers {
    pub mod bookings;
    pub mod checkins;
    pub mod payments;
    pub mod venues;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod webhook;
}

pub mod validation {
    pub mod bookings;
}
