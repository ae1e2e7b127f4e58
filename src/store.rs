use crate::error::AgentError;
use crate::ipc::keys;
use crate::models::{Session, User};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Display sentinel for an absent or unreadable last-sent timestamp
pub const NEVER_SENT: &str = "never";

/// Persistent string-keyed store (the app's AsyncStorage equivalent).
/// Every call is atomic on its own; `set_many`/`remove_many` are atomic across keys.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AgentError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AgentError>;
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), AgentError>;
    fn remove_many(&self, keys: &[&str]) -> Result<(), AgentError>;
}

/// In-process store. Used by tests and as a fallback when SQLite can't be opened.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AgentError> {
        self.values
            .lock()
            .map_err(|e| AgentError::Storage(format!("Mutex poisoned: {}", e)))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, AgentError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AgentError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), AgentError> {
        let mut values = self.lock()?;
        for (key, value) in entries {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), AgentError> {
        let mut values = self.lock()?;
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }
}

// ============================================
// TYPED ACCESSORS
// ============================================

pub fn access_token(store: &dyn CredentialStore) -> Result<Option<String>, AgentError> {
    store.get(keys::AUTH_TOKEN)
}

pub fn refresh_token(store: &dyn CredentialStore) -> Result<Option<String>, AgentError> {
    store.get(keys::REFRESH_TOKEN)
}

pub fn load_session(store: &dyn CredentialStore) -> Result<Session, AgentError> {
    let user_id = store
        .get(keys::AUTH_USER)?
        .and_then(|raw| serde_json::from_str::<User>(&raw).ok())
        .map(|u| u.id);
    Ok(Session {
        access_token: access_token(store)?,
        refresh_token: refresh_token(store)?,
        user_id,
    })
}

/// Tokens always travel as a pair: both or neither get written.
pub fn save_tokens(
    store: &dyn CredentialStore,
    access_token: &str,
    refresh_token: &str,
) -> Result<(), AgentError> {
    store.set_many(&[
        (keys::AUTH_TOKEN, access_token),
        (keys::REFRESH_TOKEN, refresh_token),
    ])
}

pub fn clear_session(store: &dyn CredentialStore) -> Result<(), AgentError> {
    store.remove_many(&[keys::AUTH_TOKEN, keys::REFRESH_TOKEN, keys::AUTH_USER])
}

pub fn record_last_sent(store: &dyn CredentialStore, at: DateTime<Utc>) -> Result<(), AgentError> {
    store.set(
        keys::LAST_SENT_AT,
        &at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )
}

/// `None` for absent or malformed values
pub fn last_sent_at(store: &dyn CredentialStore) -> Result<Option<DateTime<Utc>>, AgentError> {
    Ok(store.get(keys::LAST_SENT_AT)?.and_then(|raw| parse_timestamp(&raw)))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            warn!("[STORE] Unreadable {} value {:?}: {}", keys::LAST_SENT_AT, raw, e);
            None
        }
    }
}

/// Local-time rendering for the "last sync" label, `"never"` when absent or unparsable
pub fn format_last_sent(raw: Option<&str>) -> String {
    match raw.and_then(parse_timestamp) {
        Some(at) => at
            .with_timezone(&Local)
            .format("%d/%m/%Y %H:%M:%S")
            .to_string(),
        None => NEVER_SENT.to_string(),
    }
}
