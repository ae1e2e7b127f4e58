use crate::engine::{EngineShared, ReportStatus};
use crate::error::AgentError;
use crate::models::{Position, ReportAttemptResult};
use crate::store;
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

enum TickControl {
    Continue,
    /// Refresh token rejected; the loop must end
    Terminate,
}

/// Report loop. Runs until `cancel` flips to true or the session becomes terminal.
/// Cancellation is observed at loop re-entry and during the inter-tick sleep,
/// never in the middle of a read or a send.
pub(crate) async fn run(shared: Arc<EngineShared>, mut cancel: watch::Receiver<bool>) {
    info!(
        "[ENGINE] Report cycle started (interval: {:?})",
        shared.config.tick_interval
    );
    let mut last_written: Option<DateTime<Utc>> = match store::last_sent_at(&*shared.store) {
        Ok(at) => at,
        Err(e) => {
            warn!("[ENGINE] Failed to read last sent timestamp: {}", e);
            None
        }
    };

    loop {
        if *cancel.borrow() {
            break;
        }

        if let TickControl::Terminate = tick(&shared, &mut last_written).await {
            shared.finish_after_terminal();
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.config.tick_interval) => {}
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Engine dropped without stop()
                    break;
                }
            }
        }
    }

    info!("[ENGINE] Report cycle exited");
}

async fn tick(shared: &EngineShared, last_written: &mut Option<DateTime<Utc>>) -> TickControl {
    let tick_no = shared.ticks.fetch_add(1, Ordering::AcqRel) + 1;
    debug!("[ENGINE] Tick {}", tick_no);

    // Previous tick got 401: consult the refresher before this send
    if shared.needs_refresh.swap(false, Ordering::AcqRel) {
        info!("[ENGINE] Refreshing token after 401 on previous tick");
        let outcome = shared.refresher.renew_session().await;
        if outcome.terminal {
            return TickControl::Terminate;
        }
    }

    let outcome = match tokio::time::timeout(
        shared.config.position_timeout,
        shared.position.read(&shared.config.position_request),
    )
    .await
    {
        Ok(Ok(position)) => send_position(shared, &position).await,
        Ok(Err(e)) => Err((None, e)),
        Err(_) => Err((
            None,
            AgentError::PositionUnavailable(format!(
                "no reading within {:?}",
                shared.config.position_timeout
            )),
        )),
    };

    // Attempt time, not delivery time; clamped so the stored value never goes back
    let now = match *last_written {
        Some(prev) if prev > Utc::now() => prev,
        _ => Utc::now(),
    };
    *last_written = Some(now);
    if let Err(e) = store::record_last_sent(&*shared.store, now) {
        warn!("[ENGINE] Failed to persist last sent timestamp: {}", e);
    }

    let result = match &outcome {
        Ok(status) => ReportAttemptResult {
            success: true,
            http_status: Some(*status),
            timestamp: now,
        },
        Err((status, _)) => ReportAttemptResult {
            success: false,
            http_status: *status,
            timestamp: now,
        },
    };

    *shared
        .last_attempt
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(result.clone());

    match outcome {
        Ok(_) => {
            debug!("[ENGINE] Tick {} delivered ({:?})", tick_no, result.http_status);
            shared.status.send_replace(ReportStatus::Synced { at: now });
        }
        Err((_, e)) => {
            warn!("[ENGINE] Tick {} failed: {}", tick_no, e);
            shared.status.send_replace(ReportStatus::Degraded {
                at: now,
                reason: e.to_string(),
            });
        }
    }

    TickControl::Continue
}

/// `Ok(status)` for 2xx; otherwise the status (if any) and the error.
async fn send_position(
    shared: &EngineShared,
    position: &Position,
) -> Result<u16, (Option<u16>, AgentError)> {
    match shared.api.update_coordinates(position).await {
        Ok(response) if response.is_success() => Ok(response.status),
        Ok(response) => {
            let status = response.status;
            let err = match response.error_for_status() {
                Err(e) => e,
                Ok(_) => AgentError::Http {
                    status,
                    message: "unexpected status".to_string(),
                },
            };
            if let AgentError::Unauthorized = err {
                warn!("[ENGINE] Unauthorized (401), token refresh scheduled for next tick");
                shared.needs_refresh.store(true, Ordering::Release);
            }
            Err((Some(status), err))
        }
        Err(e) => Err((None, e)),
    }
}
