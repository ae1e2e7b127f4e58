use crate::auth::TokenRefresher;
use crate::config::AgentConfig;
use crate::models::{AgentEvent, ReportAttemptResult};
use crate::network::ApiClient;
use crate::position::{LocationPermission, PositionSource};
use crate::store::CredentialStore;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
mod core;
mod cycle;

/// Reporting Engine - строгая FSM
/// One instance per process, owned by the composition root (`Agent`).
pub struct ReportingEngine {
    pub(crate) shared: Arc<EngineShared>,
}

/// Состояние движка. Легальные переходы:
/// Stopped → Starting → Running, Starting → Stopped (permission/auth),
/// Running → Stopping → Stopped, Running → Stopped (terminal auth inside the cycle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportingState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What the host shows in the persistent notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Idle,
    Synced { at: DateTime<Utc> },
    Degraded { at: DateTime<Utc>, reason: String },
}

impl ReportStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ReportStatus::Degraded { .. })
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportStatus::Idle => "Locator active",
            ReportStatus::Synced { .. } => "Location active",
            ReportStatus::Degraded { .. } => "Location inactive",
        }
    }

    pub fn description(&self) -> String {
        match self {
            ReportStatus::Idle => "Syncing location...".to_string(),
            ReportStatus::Synced { at } => format!(
                "Synced. (Last update: {})",
                at.with_timezone(&Local).format("%H:%M:%S")
            ),
            ReportStatus::Degraded { at, .. } => format!(
                "Sync failed. (Last attempt: {})",
                at.with_timezone(&Local).format("%H:%M:%S")
            ),
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) state: ReportingState,
    /// `stop()` arrived while Starting; the pending start lands in Stopped
    pub(crate) start_cancelled: bool,
    /// `start()` arrived while Stopping; `stop()` restarts once the loop has exited
    pub(crate) restart_requested: bool,
    pub(crate) cancel: Option<watch::Sender<bool>>,
    pub(crate) task: Option<JoinHandle<()>>,
}

pub(crate) struct EngineShared {
    /// Never held across an await
    pub(crate) inner: Mutex<EngineInner>,
    pub(crate) config: AgentConfig,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) api: Arc<ApiClient>,
    pub(crate) refresher: Arc<TokenRefresher>,
    pub(crate) position: Arc<dyn PositionSource>,
    pub(crate) permission: Arc<dyn LocationPermission>,
    pub(crate) status: watch::Sender<ReportStatus>,
    pub(crate) events: broadcast::Sender<AgentEvent>,
    /// Set by a 401; the next tick refreshes before sending
    pub(crate) needs_refresh: AtomicBool,
    pub(crate) ticks: AtomicU64,
    pub(crate) last_attempt: Mutex<Option<ReportAttemptResult>>,
}

impl ReportingEngine {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn CredentialStore>,
        api: Arc<ApiClient>,
        refresher: Arc<TokenRefresher>,
        position: Arc<dyn PositionSource>,
        permission: Arc<dyn LocationPermission>,
        events: broadcast::Sender<AgentEvent>,
    ) -> Self {
        let (status, _) = watch::channel(ReportStatus::Idle);
        Self {
            shared: Arc::new(EngineShared {
                inner: Mutex::new(EngineInner {
                    state: ReportingState::Stopped,
                    start_cancelled: false,
                    restart_requested: false,
                    cancel: None,
                    task: None,
                }),
                config,
                store,
                api,
                refresher,
                position,
                permission,
                status,
                events,
                needs_refresh: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
                last_attempt: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ReportStatus> {
        self.shared.status.subscribe()
    }

    pub fn status(&self) -> ReportStatus {
        self.shared.status.borrow().clone()
    }

    pub fn last_attempt(&self) -> Option<ReportAttemptResult> {
        self.shared
            .last_attempt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Ticks executed since process start (all cycles)
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(std::sync::atomic::Ordering::Acquire)
    }
}
