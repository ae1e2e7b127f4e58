use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::ReportingEngine;
use crate::error::AgentError;

/// Host application execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycle {
    /// `becameActive`: app is in the foreground
    Active,
    /// `enteredBackground`
    Background,
    /// Transitional (e.g. iOS `inactive`); neither starts nor stops reporting
    Inactive,
}

/// Drives the engine from foreground/background transitions.
///
/// Policy: report only while the app is NOT in the foreground.
/// `Background` → `start()`, `Active` → `stop()`. Transitions are applied one
/// at a time, in arrival order.
pub struct LifecycleCoordinator {
    engine: Arc<ReportingEngine>,
    serial: Mutex<()>,
}

impl LifecycleCoordinator {
    pub fn new(engine: Arc<ReportingEngine>) -> Self {
        Self {
            engine,
            serial: Mutex::new(()),
        }
    }

    pub async fn on_transition(&self, next: AppLifecycle) -> Result<(), AgentError> {
        let _serial = self.serial.lock().await;
        match next {
            AppLifecycle::Background => {
                info!("[LIFECYCLE] Entered background, starting reporting");
                self.engine.start().await
            }
            AppLifecycle::Active => {
                info!("[LIFECYCLE] Became active, stopping reporting");
                self.engine.stop().await
            }
            AppLifecycle::Inactive => {
                debug!("[LIFECYCLE] Inactive, no change");
                Ok(())
            }
        }
    }

    /// The lifecycle state at boot fires no transition event, so apply it explicitly.
    pub async fn cold_start(&self, current: AppLifecycle) -> Result<(), AgentError> {
        info!("[LIFECYCLE] Cold start in {:?} state", current);
        self.on_transition(current).await
    }

    /// Consume host signals until the sender side is dropped.
    /// Errors are already surfaced as events by the engine; here they are only logged.
    pub fn spawn(self: Arc<Self>, mut signals: mpsc::Receiver<AppLifecycle>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(next) = signals.recv().await {
                if let Err(e) = self.on_transition(next).await {
                    warn!("[LIFECYCLE] Transition to {:?} failed: {}", next, e);
                }
            }
            debug!("[LIFECYCLE] Signal channel closed");
        })
    }
}
