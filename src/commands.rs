//! Host bridge commands. Each one is a thin call into the agent; the host
//! serializes the results for its UI layer.

use crate::engine::{ReportStatus, ReportingState};
use crate::error::AgentError;
use crate::ipc::keys;
use crate::models::User;
use crate::orders::{self, DriverOrder};
use crate::updates::{self, UpdateInfo};
use crate::{store, Agent};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReportingStatusResponse {
    pub is_enabled: bool,
    pub state: ReportingState,
    /// Local time, or `"never"`
    pub last_sent_at: String,
    pub status: ReportStatus,
    pub title: String,
    pub description: String,
}

/// The home-screen switch. Goes through the same engine as the lifecycle
/// coordinator, so a later transition may flip it again.
pub async fn set_reporting_enabled(agent: &Agent, enabled: bool) -> Result<(), AgentError> {
    info!("[ENGINE] Reporting toggled by user: {}", enabled);
    if enabled {
        agent.engine.start().await
    } else {
        agent.engine.stop().await
    }
}

pub fn get_reporting_status(agent: &Agent) -> Result<ReportingStatusResponse, AgentError> {
    let raw = agent.store.get(keys::LAST_SENT_AT)?;
    let status = agent.engine.status();
    Ok(ReportingStatusResponse {
        is_enabled: agent.engine.is_running(),
        state: agent.engine.state(),
        last_sent_at: store::format_last_sent(raw.as_deref()),
        title: status.title().to_string(),
        description: status.description(),
        status,
    })
}

pub async fn login(agent: &Agent, email: &str, password: &str) -> Result<User, AgentError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AgentError::InvalidState(
            "email and password are required".to_string(),
        ));
    }
    agent.refresher.login(email, password).await
}

/// Stops reporting before the tokens disappear, so no tick sends without a token.
pub async fn logout(agent: &Agent) -> Result<(), AgentError> {
    agent.engine.stop().await?;
    agent.refresher.logout()?;
    agent
        .orders
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
    Ok(())
}

pub async fn check_for_updates(agent: &Agent) -> Result<Option<UpdateInfo>, AgentError> {
    updates::check_for_updates(&agent.api, &agent.config.app_version).await
}

pub async fn list_driver_orders(agent: &Agent) -> Result<Vec<DriverOrder>, AgentError> {
    let orders = orders::fetch_driver_orders(&agent.api).await?;
    *agent.orders.lock().unwrap_or_else(|e| e.into_inner()) = orders.clone();
    Ok(orders)
}

/// Looks the order up in the last fetched list; unknown ids are rejected
/// without touching the network.
pub async fn advance_order_status(
    agent: &Agent,
    order_id: &str,
) -> Result<DriverOrder, AgentError> {
    let order = agent
        .orders
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .find(|o| o.id == order_id)
        .cloned();
    let order = match order {
        Some(order) => order,
        None => {
            warn!("[ORDERS] Unknown order {}", order_id);
            return Err(AgentError::InvalidState(format!(
                "order {} is not in the current list",
                order_id
            )));
        }
    };

    let updated = orders::advance_order_status(
        &agent.api,
        &*agent.position,
        &agent.config.position_request,
        &order,
    )
    .await?;

    let mut cached = agent.orders.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(slot) = cached.iter_mut().find(|o| o.id == updated.id) {
        *slot = updated.clone();
    }
    Ok(updated)
}
