use crate::models::{Accuracy, PositionRequest};
use std::time::Duration;

/// Env override for the API base URL (set by the host build).
pub const API_URL_ENV: &str = "DRIVER_LOCATOR_API_URL";

/// Конфигурация агента (api_base_url, таймауты, частота отчётов)
/// Fixed at startup; nothing here is editable while the agent runs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
    /// Pause between two report ticks
    pub tick_interval: Duration,
    /// Upper bound for a single position read
    pub position_timeout: Duration,
    pub position_request: PositionRequest,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.logistigas.com.br".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            tick_interval: Duration::from_secs(30),
            position_timeout: Duration::from_secs(15),
            position_request: PositionRequest {
                accuracy: Accuracy::Balanced,
                min_interval: Duration::from_secs(60),
                distance_filter_m: 100.0,
            },
        }
    }
}

impl AgentConfig {
    /// Defaults with `DRIVER_LOCATOR_API_URL` applied when set and non-empty.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                config.api_base_url = url.trim_end_matches('/').to_string();
            }
        }
        config
    }
}
