use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::auth::TokenEncryption;
use crate::error::AgentError;
use crate::ipc::keys;
use crate::store::CredentialStore;
use rusqlite::Error::InvalidParameterName;

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation; caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!("[STORE] {}: Disk full. Free space on device.", context);
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[STORE] {}: Permission denied or read-only. Check app data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[STORE] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// Значения этих ключей шифруются перед записью в SQLite
fn is_secret_key(key: &str) -> bool {
    key == keys::AUTH_TOKEN || key == keys::REFRESH_TOKEN
}

/// SQLite-backed CredentialStore (table `app_meta`)
pub struct SqliteCredentialStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) encryption: Arc<TokenEncryption>,
}

impl SqliteCredentialStore {
    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup, detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[STORE] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");

        let key_dir = Path::new(db_path)
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        let encryption = TokenEncryption::new(key_dir).map_err(InvalidParameterName)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            encryption: Arc::new(encryption),
        };
        store.run_migrations()?;
        info!("[STORE] Credential store opened");
        Ok(store)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS app_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
                [],
            )?;
        }

        if current < Self::SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        }
        Ok(())
    }

    fn encode_value(&self, key: &str, value: &str) -> Result<String, AgentError> {
        if is_secret_key(key) {
            self.encryption.encrypt(value).map_err(AgentError::Storage)
        } else {
            Ok(value.to_string())
        }
    }

    fn decode_value(&self, key: &str, stored: String) -> Result<String, AgentError> {
        if is_secret_key(key) {
            self.encryption.decrypt(&stored).map_err(AgentError::Storage)
        } else {
            Ok(stored)
        }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, AgentError> {
        let stored: Option<String> = {
            let conn = self.lock_conn()?;
            let value = conn
                .query_row(
                    "SELECT value FROM app_meta WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            value
        };
        match stored {
            Some(value) => match self.decode_value(key, value) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    // Не расшифровывается (сменился ключ): считаем, что значения нет
                    warn!("[STORE] Dropping unreadable value for {}: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AgentError> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), AgentError> {
        let encoded = entries
            .iter()
            .map(|(k, v)| Ok((*k, self.encode_value(k, v)?)))
            .collect::<Result<Vec<_>, AgentError>>()?;

        let mut conn = self.lock_conn()?;
        let result = (|| -> SqliteResult<()> {
            let tx = conn.transaction()?;
            for (key, value) in &encoded {
                tx.execute(
                    "INSERT INTO app_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                    params![key, value],
                )?;
            }
            tx.commit()
        })();
        if let Err(e) = &result {
            log_io_error_if_any("set_many", e);
        }
        result.map_err(AgentError::from)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), AgentError> {
        let mut conn = self.lock_conn()?;
        let result = (|| -> SqliteResult<()> {
            let tx = conn.transaction()?;
            for key in keys {
                tx.execute("DELETE FROM app_meta WHERE key = ?1", params![key])?;
            }
            tx.commit()
        })();
        if let Err(e) = &result {
            log_io_error_if_any("remove_many", e);
        }
        result.map_err(AgentError::from)
    }
}
