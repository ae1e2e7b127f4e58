use crate::ipc::events;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Координаты устройства (одно чтение PositionSource)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy in meters, if the platform reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Wire body for coordinate updates: only lat/lng leave the device.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl From<&Position> for Coordinates {
    fn from(p: &Position) -> Self {
        Self {
            lat: p.lat,
            lng: p.lng,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    Low,
    Balanced,
    High,
}

/// Preferences forwarded to the platform on every read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRequest {
    pub accuracy: Accuracy,
    pub min_interval: Duration,
    pub distance_filter_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Содержимое CredentialStore в разобранном виде
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Результат обновления токена (`POST /auth/refresh`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

/// Ответ `POST /auth/login`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub user: User,
}

/// Outcome of one report tick. Only `timestamp` is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportAttemptResult {
    pub success: bool,
    pub http_status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub renewed: bool,
    /// Refresh token rejected or absent: the session must be cleared
    pub terminal: bool,
}

impl RefreshOutcome {
    pub const RENEWED: Self = Self {
        renewed: true,
        terminal: false,
    };
    pub const TERMINAL: Self = Self {
        renewed: false,
        terminal: true,
    };
    /// Another refresh was already in flight; nothing changed here.
    pub const SKIPPED: Self = Self {
        renewed: false,
        terminal: false,
    };
}

/// Conditions pushed to the host UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    PermissionDenied,
    SessionExpired,
    ReportingStarted,
    ReportingStopped,
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::PermissionDenied => events::PERMISSION_DENIED,
            AgentEvent::SessionExpired => events::SESSION_EXPIRED,
            AgentEvent::ReportingStarted => events::REPORTING_STARTED,
            AgentEvent::ReportingStopped => events::REPORTING_STOPPED,
        }
    }
}

/// Куда отправить пользователя после старта
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialRoute {
    Login,
    Home,
}
