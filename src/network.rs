use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::ipc::routes;
use crate::models::{Coordinates, LoginResponse, Position, TokenPair};
use crate::store::{self, CredentialStore};

/// Один исходящий запрос к API (до применения base_url)
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        serde_json::from_str(&self.body)
            .map_err(|e| AgentError::Parse(format!("Failed to parse response: {}", e)))
    }

    /// 401 → `Unauthorized`, any other non-2xx → `Http`
    pub fn error_for_status(self) -> Result<Self, AgentError> {
        if self.is_success() {
            return Ok(self);
        }
        if self.status == 401 {
            return Err(AgentError::Unauthorized);
        }
        let message = if self.body.is_empty() {
            StatusCode::from_u16(self.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .to_string()
        } else {
            self.body
        };
        Err(AgentError::Http {
            status: self.status,
            message,
        })
    }
}

/// Transport seam. Network-layer failures come back as `AgentError::Network`;
/// any HTTP status (including 4xx/5xx) comes back as `Ok(ApiResponse)`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, AgentError>;
}

pub struct ReqwestTransport {
    base_url: String,
    client: Client,
    app_version: String,
}

impl ReqwestTransport {
    pub fn new(config: &AgentConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(config, client)
    }

    pub(crate) fn with_client(config: &AgentConfig, client: Client) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
            app_version: config.app_version.clone(),
        }
    }

    pub(crate) fn build(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header("Content-Type", "application/json")
            .header("X-App-Version", &self.app_version);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, AgentError> {
        debug!("[API] {} {}", request.method, request.path);
        let response = self
            .build(&request)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    "[API] Failed to read response body ({} {}, status {}): {}",
                    request.method, request.path, status, e
                );
                String::new()
            }
        };
        Ok(ApiResponse { status, body })
    }
}

/// Source of the bearer token, consulted on every request.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// Reads `auth-token` straight from the store each time.
pub struct StoreTokenProvider {
    store: Arc<dyn CredentialStore>,
}

impl StoreTokenProvider {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

impl TokenProvider for StoreTokenProvider {
    fn access_token(&self) -> Option<String> {
        match store::access_token(&*self.store) {
            Ok(token) => token,
            Err(e) => {
                warn!("[API] Failed to read access token: {}", e);
                None
            }
        }
    }
}

/// API client for the driver backend. Attaches the current access token to
/// every request; the token is never cached between calls.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { transport, tokens }
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, AgentError> {
        let request = ApiRequest {
            method,
            path: path.to_string(),
            body,
            bearer: self.tokens.access_token(),
        };
        self.transport.execute(request).await
    }

    /// Raw response: the caller decides what a 401 means.
    pub async fn update_coordinates(&self, position: &Position) -> Result<ApiResponse, AgentError> {
        let body = serde_json::to_value(Coordinates::from(position))?;
        self.send(Method::PATCH, routes::COORDINATES, Some(body))
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AgentError> {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        self.send(Method::POST, routes::AUTH_REFRESH, Some(body))
            .await?
            .error_for_status()?
            .json()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AgentError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.send(Method::POST, routes::AUTH_LOGIN, Some(body))
            .await?
            .error_for_status()?
            .json()
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, AgentError> {
        self.send(Method::GET, path, None).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, AgentError> {
        self.send(Method::PATCH, path, Some(body)).await
    }
}
