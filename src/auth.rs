use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use scopeguard::guard;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify, OnceCell};
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::ipc::keys;
use crate::models::{AgentEvent, RefreshOutcome, User};
use crate::network::ApiClient;
use crate::store::{self, CredentialStore};

/// Hex-encoded 32-byte key; takes precedence over the key file.
pub const ENCRYPTION_KEY_ENV: &str = "DRIVER_LOCATOR_ENCRYPTION_KEY";
const KEY_FILE_NAME: &str = ".credential.key";

/// Keeps the access token valid. The only writer of session tokens besides logout.
///
/// `refresh()` is single-flight: a call that lands while another refresh is in
/// flight returns [`RefreshOutcome::SKIPPED`] instead of rotating the token twice.
/// `ensure_session()` runs the bootstrap refresh at most once per session.
pub struct TokenRefresher {
    store: Arc<dyn CredentialStore>,
    api: Arc<ApiClient>,
    events: broadcast::Sender<AgentEvent>,
    is_refreshing: AtomicBool,
    /// Woken whenever a refresh run finishes
    refresh_done: Notify,
    session: Mutex<Arc<OnceCell<RefreshOutcome>>>,
}

impl TokenRefresher {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        api: Arc<ApiClient>,
        events: broadcast::Sender<AgentEvent>,
    ) -> Self {
        Self {
            store,
            api,
            events,
            is_refreshing: AtomicBool::new(false),
            refresh_done: Notify::new(),
            session: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    /// Exchange the stored refresh token for a new pair.
    /// Does not touch the session on failure; see [`Self::renew_session`].
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .is_refreshing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[AUTH] Refresh already in progress, skipping");
            return RefreshOutcome::SKIPPED;
        }

        let _guard = guard((), |_| {
            self.is_refreshing.store(false, Ordering::Release);
            self.refresh_done.notify_waiters();
        });

        let refresh_token = match store::refresh_token(&*self.store) {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("[AUTH] No refresh token stored");
                return RefreshOutcome::TERMINAL;
            }
            Err(e) => {
                error!("[AUTH] Failed to read refresh token: {}", e);
                return RefreshOutcome::TERMINAL;
            }
        };

        match self.api.refresh(&refresh_token).await {
            Ok(pair) => {
                // Ротация: старый refresh token больше не читается никем
                if let Err(e) = store::save_tokens(&*self.store, &pair.token, &pair.refresh_token)
                {
                    error!("[AUTH] Failed to persist rotated tokens: {}", e);
                    return RefreshOutcome::TERMINAL;
                }
                info!(
                    "[AUTH] Token refreshed (access token length: {})",
                    pair.token.len()
                );
                RefreshOutcome::RENEWED
            }
            Err(e) => {
                warn!("[AUTH] Token refresh failed: {}", e);
                RefreshOutcome::TERMINAL
            }
        }
    }

    /// `refresh()` plus the caller's duty on terminal failure: clear the session
    /// and tell the host to re-authenticate.
    pub async fn renew_session(&self) -> RefreshOutcome {
        let outcome = self.refresh().await;
        if outcome.terminal {
            self.invalidate_session();
        }
        outcome
    }

    /// Bootstrap refresh for the current session. Concurrent callers await the same run.
    pub async fn ensure_session(&self) -> RefreshOutcome {
        let cell = self.current_session();
        *cell.get_or_init(|| self.bootstrap_refresh()).await
    }

    /// A bootstrap that lands on an in-flight refresh waits for it and runs its own;
    /// `SKIPPED` is never recorded as the session outcome.
    async fn bootstrap_refresh(&self) -> RefreshOutcome {
        loop {
            let done = self.refresh_done.notified();
            tokio::pin!(done);
            // Registered before the attempt, so a refresh ending in between still wakes us
            done.as_mut().enable();

            let outcome = self.renew_session().await;
            if outcome != RefreshOutcome::SKIPPED {
                return outcome;
            }
            debug!("[AUTH] Bootstrap waiting for in-flight refresh");
            done.await;
        }
    }

    /// Terminal outcome of the current session, if bootstrap has already run.
    pub fn session_outcome(&self) -> Option<RefreshOutcome> {
        self.current_session().get().copied()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, AgentError> {
        let response = self.api.login(email, password).await?;
        let user_json = serde_json::to_string(&response.user)?;
        self.store.set_many(&[
            (keys::AUTH_TOKEN, response.token.as_str()),
            (keys::REFRESH_TOKEN, response.refresh_token.as_str()),
            (keys::AUTH_USER, user_json.as_str()),
        ])?;
        // Свежий логин: refresh в этой сессии не нужен
        self.replace_session(OnceCell::new_with(Some(RefreshOutcome::RENEWED)));
        info!("[AUTH] Logged in as user {}", response.user.id);
        Ok(response.user)
    }

    pub fn logout(&self) -> Result<(), AgentError> {
        store::clear_session(&*self.store)?;
        self.replace_session(OnceCell::new());
        info!("[AUTH] Logged out, session cleared");
        Ok(())
    }

    fn invalidate_session(&self) {
        if let Err(e) = store::clear_session(&*self.store) {
            error!("[AUTH] Failed to clear session after terminal refresh: {}", e);
        }
        self.replace_session(OnceCell::new_with(Some(RefreshOutcome::TERMINAL)));
        warn!("[AUTH] Session expired, re-authentication required");
        let _ = self.events.send(AgentEvent::SessionExpired);
    }

    fn current_session(&self) -> Arc<OnceCell<RefreshOutcome>> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace_session(&self, cell: OnceCell<RefreshOutcome>) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(cell);
    }
}

// ============================================
// TOKEN ENCRYPTION
// ============================================

fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Шифрование токенов перед сохранением в SQLite
/// Использует AES-256-GCM для шифрования
pub struct TokenEncryption {
    cipher: Aes256Gcm,
}

impl TokenEncryption {
    /// Key from `DRIVER_LOCATOR_ENCRYPTION_KEY`, else from the key file in `key_dir`
    /// (created on first use), else an in-memory key for this process only.
    pub fn new(key_dir: Option<&Path>) -> Result<Self, String> {
        let key = match std::env::var(ENCRYPTION_KEY_ENV) {
            Ok(hex_key) => hex::decode(hex_key.trim())
                .map_err(|e| format!("{} is not valid hex: {}", ENCRYPTION_KEY_ENV, e))?,
            Err(_) => match key_dir {
                Some(dir) => Self::load_or_create_key_file(dir)?,
                None => generate_key(),
            },
        };

        if key.len() != 32 {
            return Err("Encryption key must be 32 bytes".to_string());
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Ok(Self { cipher })
    }

    fn load_or_create_key_file(dir: &Path) -> Result<Vec<u8>, String> {
        let path = dir.join(KEY_FILE_NAME);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read key file {}: {}", path.display(), e))?;
            return hex::decode(contents.trim())
                .map_err(|e| format!("Corrupted key file {}: {}", path.display(), e));
        }

        let key = generate_key();
        std::fs::write(&path, hex::encode(&key))
            .map_err(|e| format!("Failed to write key file {}: {}", path.display(), e))?;
        info!("[STORE] Generated new credential key at {}", path.display());
        Ok(key)
    }

    /// Зашифровать токен
    pub fn encrypt(&self, token: &str) -> Result<String, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, token.as_bytes())
            .map_err(|e| format!("Encryption failed: {}", e))?;

        // nonce + ciphertext, затем base64 для хранения в SQLite
        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);

        use base64::{engine::general_purpose, Engine as _};
        Ok(general_purpose::STANDARD.encode(&result))
    }

    /// Расшифровать токен
    pub fn decrypt(&self, encrypted: &str) -> Result<String, String> {
        use base64::{engine::general_purpose, Engine as _};
        let data = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| format!("Base64 decode failed: {}", e))?;

        if data.len() < 12 {
            return Err("Invalid encrypted data length".to_string());
        }

        let nonce = Nonce::from_slice(&data[..12]);
        let ciphertext = &data[12..];

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| format!("UTF-8 decode failed: {}", e))
    }
}
