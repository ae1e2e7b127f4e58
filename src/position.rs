use async_trait::async_trait;

use crate::error::AgentError;
use crate::models::{Position, PositionRequest};

/// Platform location capability, implemented by the host
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// One current reading. Failures map to `AgentError::PositionUnavailable`.
    async fn read(&self, request: &PositionRequest) -> Result<Position, AgentError>;
}

/// Capability gate for background location. Must answer immediately,
/// without showing a dialog or waiting on the user.
pub trait LocationPermission: Send + Sync {
    fn background_location_granted(&self) -> bool;
}

impl<F> LocationPermission for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn background_location_granted(&self) -> bool {
        self()
    }
}
