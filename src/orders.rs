use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::ipc::routes;
use crate::models::{Accuracy, Coordinates, PositionRequest};
use crate::network::ApiClient;
use crate::position::PositionSource;

pub const STATUS_PENDING: &str = "pendente";
pub const STATUS_LOADING: &str = "carregando";
pub const STATUS_UNLOADING: &str = "descarregando";

/// Заказ водителя. Unknown fields are kept so the host can render them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverOrder {
    #[serde(rename = "_id")]
    pub id: String,
    pub status: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// pendente → carregando, everything else → descarregando
pub fn next_status(current: &str) -> &'static str {
    if current == STATUS_PENDING {
        STATUS_LOADING
    } else {
        STATUS_UNLOADING
    }
}

pub async fn fetch_driver_orders(api: &ApiClient) -> Result<Vec<DriverOrder>, AgentError> {
    let orders: Vec<DriverOrder> = api
        .get(routes::DRIVER_ORDERS)
        .await?
        .error_for_status()?
        .json()?;
    info!("[ORDERS] Fetched {} orders", orders.len());
    Ok(orders)
}

/// Reads one position and reports the order's next status together with it.
/// Returns the order with the new status applied.
pub async fn advance_order_status(
    api: &ApiClient,
    position: &dyn PositionSource,
    request: &PositionRequest,
    order: &DriverOrder,
) -> Result<DriverOrder, AgentError> {
    let new_status = next_status(&order.status);
    let request = PositionRequest {
        accuracy: Accuracy::Balanced,
        ..*request
    };
    let reading = position.read(&request).await?;

    let body = serde_json::json!({
        "status": new_status,
        "pos": Coordinates::from(&reading),
    });
    if let Err(e) = api
        .patch(&routes::order_driver_status(&order.id), body)
        .await?
        .error_for_status()
    {
        warn!("[ORDERS] Failed to change status of {}: {}", order.id, e);
        return Err(e);
    }

    info!(
        "[ORDERS] Order {} moved {} → {}",
        order.id, order.status, new_status
    );
    Ok(DriverOrder {
        status: new_status.to_string(),
        ..order.clone()
    })
}
