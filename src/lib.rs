use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};
mod auth;
pub mod commands;
mod config;
mod database;
mod engine;
mod error;
mod ipc;
mod lifecycle;
mod models;
mod network;
mod orders;
mod position;
mod store;
mod updates;

pub use crate::auth::{TokenEncryption, TokenRefresher, ENCRYPTION_KEY_ENV};
pub use crate::config::{AgentConfig, API_URL_ENV};
pub use crate::database::SqliteCredentialStore;
pub use crate::engine::{ReportStatus, ReportingEngine, ReportingState};
pub use crate::error::AgentError;
pub use crate::ipc::{events, keys, routes};
pub use crate::lifecycle::{AppLifecycle, LifecycleCoordinator};
pub use crate::models::{
    Accuracy, AgentEvent, Coordinates, InitialRoute, Position, PositionRequest,
    RefreshOutcome, ReportAttemptResult, Session, User,
};
pub use crate::network::{
    ApiClient, ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, StoreTokenProvider,
    TokenProvider,
};
pub use crate::orders::DriverOrder;
pub use crate::position::{LocationPermission, PositionSource};
pub use crate::store::{CredentialStore, MemoryCredentialStore, NEVER_SENT};
pub use crate::updates::{compare_versions, UpdateInfo};


/// Event bus capacity; slow subscribers lose the oldest events first
const EVENT_CAPACITY: usize = 64;

/// Инициализация логирования: по умолчанию info (если RUST_LOG не задан), чтобы [ENGINE]/[AUTH] были видны.
/// Safe to call more than once; the host may have installed its own subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Composition root: one per process, handed to the host bridge.
pub struct Agent {
    pub(crate) config: AgentConfig,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) api: Arc<ApiClient>,
    pub(crate) refresher: Arc<TokenRefresher>,
    pub(crate) engine: Arc<ReportingEngine>,
    pub(crate) lifecycle: Arc<LifecycleCoordinator>,
    pub(crate) position: Arc<dyn PositionSource>,
    pub(crate) events: broadcast::Sender<AgentEvent>,
    /// Last list returned by `list_driver_orders`
    pub(crate) orders: Mutex<Vec<DriverOrder>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn HttpTransport>,
        position: Arc<dyn PositionSource>,
        permission: Arc<dyn LocationPermission>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tokens: Arc<dyn TokenProvider> = Arc::new(StoreTokenProvider::new(store.clone()));
        let api = Arc::new(ApiClient::new(transport, tokens));
        let refresher = Arc::new(TokenRefresher::new(
            store.clone(),
            api.clone(),
            events.clone(),
        ));
        let engine = Arc::new(ReportingEngine::new(
            config.clone(),
            store.clone(),
            api.clone(),
            refresher.clone(),
            position.clone(),
            permission,
            events.clone(),
        ));
        let lifecycle = Arc::new(LifecycleCoordinator::new(engine.clone()));

        info!("[ENGINE] Agent created (api: {})", config.api_base_url);
        Self {
            config,
            store,
            api,
            refresher,
            engine,
            lifecycle,
            position,
            events,
            orders: Mutex::new(Vec::new()),
        }
    }

    /// Production wiring: encrypted SQLite store and the reqwest transport.
    /// Falls back to an in-memory store when the database can't be opened, so
    /// the host still boots (to the login screen).
    pub fn with_sqlite(
        config: AgentConfig,
        db_path: &Path,
        position: Arc<dyn PositionSource>,
        permission: Arc<dyn LocationPermission>,
    ) -> Self {
        let store: Arc<dyn CredentialStore> = match db_path
            .to_str()
            .ok_or_else(|| {
                AgentError::Storage(format!(
                    "Database path contains invalid UTF-8: {}",
                    db_path.display()
                ))
            })
            .and_then(|path| SqliteCredentialStore::new(path).map_err(AgentError::from))
        {
            Ok(db) => Arc::new(db),
            Err(e) => {
                warn!(
                    "[STORE] Failed to open credential database, using in-memory store: {}",
                    e
                );
                Arc::new(MemoryCredentialStore::new())
            }
        };
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config));
        Self::new(config, store, transport, position, permission)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn engine(&self) -> &Arc<ReportingEngine> {
        &self.engine
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleCoordinator> {
        &self.lifecycle
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Startup sequence: bootstrap refresh first, then the cold-start lifecycle
    /// state. A terminal bootstrap sends the user to login without starting anything.
    pub async fn bootstrap(&self, current: AppLifecycle) -> InitialRoute {
        let logged_in = match store::access_token(&*self.store) {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!("[AUTH] Failed to read stored session: {}", e);
                false
            }
        };
        if !logged_in && !self.has_refresh_token() {
            info!("[AUTH] No stored session, routing to login");
            return InitialRoute::Login;
        }

        let outcome = self.refresher.ensure_session().await;
        if outcome.terminal {
            return InitialRoute::Login;
        }

        if let Err(e) = self.lifecycle.cold_start(current).await {
            // Permission denial is already published as an event
            warn!("[LIFECYCLE] Cold start did not start reporting: {}", e);
        }
        InitialRoute::Home
    }

    fn has_refresh_token(&self) -> bool {
        matches!(store::refresh_token(&*self.store), Ok(Some(_)))
    }
}
