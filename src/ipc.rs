//! Centralized host event and command names.
//! Prevents typos and keeps the Rust side and the mobile shell in agreement.

/// Event names (Rust emit ↔ host listen)
pub mod events {
    pub const PERMISSION_DENIED: &str = "location-permission-denied";
    /// Terminal refresh failure: host must route to the login screen.
    pub const SESSION_EXPIRED: &str = "session-expired";
    pub const REPORTING_STARTED: &str = "reporting-started";
    pub const REPORTING_STOPPED: &str = "reporting-stopped";
}

/// Persisted state keys (string-keyed store shared with the host)
pub mod keys {
    pub const AUTH_TOKEN: &str = "auth-token";
    pub const REFRESH_TOKEN: &str = "refresh-token";
    pub const AUTH_USER: &str = "auth-user";
    pub const LAST_SENT_AT: &str = "last-location-sent-at";
}

/// API paths relative to `api_base_url`
pub mod routes {
    pub const COORDINATES: &str = "/users/drivers/coordinates";
    pub const AUTH_REFRESH: &str = "/auth/refresh";
    pub const AUTH_LOGIN: &str = "/auth/login";
    pub const APP_UPDATES: &str = "/news/app-updates";
    pub const DRIVER_ORDERS: &str = "/orders/driver";

    pub fn order_driver_status(order_id: &str) -> String {
        format!("/orders/{}/driver-status", order_id)
    }
}
