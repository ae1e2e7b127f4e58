use crate::engine::cycle;
use crate::engine::{EngineInner, EngineShared, ReportStatus, ReportingEngine, ReportingState};
use crate::error::AgentError;
use crate::models::AgentEvent;
use std::sync::MutexGuard;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

impl EngineShared {
    pub(crate) fn lock_inner(&self) -> Result<MutexGuard<'_, EngineInner>, AgentError> {
        self.inner
            .lock()
            .map_err(|e| AgentError::InvalidState(format!("Mutex poisoned: {}", e)))
    }

    fn set_stopped(&self) -> Result<(), AgentError> {
        let mut inner = self.lock_inner()?;
        inner.state = ReportingState::Stopped;
        inner.start_cancelled = false;
        Ok(())
    }

    /// Цикл сам завершился (terminal auth). Running → Stopped, если stop() ещё не начат.
    pub(crate) fn finish_after_terminal(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != ReportingState::Running {
            // stop() уже ждёт завершения задачи и сам переведёт в Stopped
            return;
        }
        inner.state = ReportingState::Stopped;
        inner.cancel = None;
        // Handle of the task we are running in; dropping it only detaches.
        inner.task = None;
        drop(inner);

        self.status.send_replace(ReportStatus::Idle);
        let _ = self.events.send(AgentEvent::ReportingStopped);
        warn!("[ENGINE] Reporting stopped: session expired");
    }
}

impl ReportingEngine {
    pub fn state(&self) -> ReportingState {
        self.shared
            .inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or_else(|e| e.into_inner().state)
    }

    /// Starting or Running
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ReportingState::Starting | ReportingState::Running
        )
    }

    /// Переход: Stopped → Starting → Running
    /// Idempotent: no-op while Starting/Running. A denied permission returns the
    /// engine to Stopped and surfaces `PermissionDenied`; no tick runs.
    pub async fn start(&self) -> Result<(), AgentError> {
        {
            let mut inner = self.shared.lock_inner()?;
            let state = inner.state;
            match state {
                ReportingState::Stopped => {
                    inner.state = ReportingState::Starting;
                    inner.start_cancelled = false;
                    inner.restart_requested = false;
                }
                ReportingState::Starting => {
                    // Later start() wins over an earlier stop() in the same startup
                    if inner.start_cancelled {
                        inner.start_cancelled = false;
                        info!("[ENGINE] start() during startup revokes the pending cancel");
                    }
                    return Ok(());
                }
                ReportingState::Running => {
                    debug!("[ENGINE] start() ignored: already {:?}", state);
                    return Ok(());
                }
                ReportingState::Stopping => {
                    inner.restart_requested = true;
                    info!("[ENGINE] start() during stop, restart scheduled");
                    return Ok(());
                }
            }
        }

        // Одна синхронная проверка, без ожидания диалога
        if !self.shared.permission.background_location_granted() {
            self.shared.set_stopped()?;
            warn!("[ENGINE] Background location permission denied, staying stopped");
            let _ = self.shared.events.send(AgentEvent::PermissionDenied);
            return Err(AgentError::PermissionDenied);
        }

        // First Running of a session waits for the bootstrap refresh
        let outcome = self.shared.refresher.ensure_session().await;
        if outcome.terminal {
            self.shared.set_stopped()?;
            warn!("[ENGINE] Session is not valid, reporting not started");
            return Err(AgentError::TerminalAuthFailure(
                "refresh token rejected".to_string(),
            ));
        }

        let mut inner = self.shared.lock_inner()?;
        if inner.start_cancelled {
            inner.state = ReportingState::Stopped;
            inner.start_cancelled = false;
            info!("[ENGINE] Start cancelled by stop() during startup");
            return Ok(());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        inner.state = ReportingState::Running;
        inner.cancel = Some(cancel_tx);
        inner.task = Some(tokio::spawn(cycle::run(self.shared.clone(), cancel_rx)));
        drop(inner);

        let _ = self.shared.events.send(AgentEvent::ReportingStarted);
        info!("[ENGINE] Reporting started");
        Ok(())
    }

    /// Переход: Running → Stopping → Stopped
    /// Cancels the next tick; an in-flight read/send is allowed to finish.
    /// Returns once the loop has exited, so a following start() never overlaps it.
    /// A start() received meanwhile is applied after the loop has exited.
    pub async fn stop(&self) -> Result<(), AgentError> {
        let (cancel, task) = {
            let mut inner = self.shared.lock_inner()?;
            let state = inner.state;
            match state {
                ReportingState::Running => {
                    inner.state = ReportingState::Stopping;
                    (inner.cancel.take(), inner.task.take())
                }
                ReportingState::Starting => {
                    inner.start_cancelled = true;
                    debug!("[ENGINE] stop() during startup, start will be cancelled");
                    return Ok(());
                }
                ReportingState::Stopping => {
                    if inner.restart_requested {
                        inner.restart_requested = false;
                        debug!("[ENGINE] stop() during stop, scheduled restart dropped");
                    }
                    return Ok(());
                }
                ReportingState::Stopped => {
                    debug!("[ENGINE] stop() ignored: already {:?}", state);
                    return Ok(());
                }
            }
        };

        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("[ENGINE] Report cycle task ended abnormally: {}", e);
            }
        }

        let restart = {
            let mut inner = self.shared.lock_inner()?;
            inner.state = ReportingState::Stopped;
            inner.start_cancelled = false;
            std::mem::take(&mut inner.restart_requested)
        };
        self.shared.status.send_replace(ReportStatus::Idle);
        let _ = self.shared.events.send(AgentEvent::ReportingStopped);
        info!("[ENGINE] Reporting stopped");

        if restart {
            info!("[ENGINE] Applying start() received while stopping");
            // Failures (permission, session) are already surfaced by start() itself
            if let Err(e) = self.start().await {
                warn!("[ENGINE] Scheduled restart failed: {}", e);
            }
        }
        Ok(())
    }
}
