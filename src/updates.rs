use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::ipc::routes;
use crate::network::ApiClient;

const DEFAULT_RELEASE_NOTES: &str = "Performance improvements and fixes.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppUpdateResponse {
    version: Option<String>,
    download_url: Option<String>,
    release_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub latest_version: String,
    pub download_url: Option<String>,
    pub release_notes: String,
}

/// Dot-separated numeric comparison. Non-numeric and missing parts count as 0,
/// so "1.2" == "1.2.0" and "1.x" == "1.0".
pub fn compare_versions(first: &str, second: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let left = parse(first);
    let right = parse(second);
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// `Some` only when the server advertises a strictly newer version.
/// A 404 means "no update published" and is not an error.
pub async fn check_for_updates(
    api: &ApiClient,
    current_version: &str,
) -> Result<Option<UpdateInfo>, AgentError> {
    let response = api.get(routes::APP_UPDATES).await?;
    if response.status == 404 {
        debug!("[UPDATES] No update published (404)");
        return Ok(None);
    }
    let payload: AppUpdateResponse = response.error_for_status()?.json()?;

    let latest = match payload.version {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            warn!("[UPDATES] Update response without version, ignoring");
            return Ok(None);
        }
    };

    if compare_versions(&latest, current_version) != Ordering::Greater {
        debug!(
            "[UPDATES] Up to date (current {}, latest {})",
            current_version, latest
        );
        return Ok(None);
    }

    info!(
        "[UPDATES] New version available: {} (current {})",
        latest, current_version
    );
    Ok(Some(UpdateInfo {
        latest_version: latest,
        download_url: payload.download_url.filter(|u| !u.is_empty()),
        release_notes: payload
            .release_notes
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_RELEASE_NOTES.to_string()),
    }))
}
