//! HTTP credential gateway
//!
//! Mints ephemeral session credentials against the upstream realtime API and
//! hands out the wake word engine key, so long-lived secrets stay on the
//! server.

pub mod health;
pub mod rate_limit;
pub mod token;

use std::sync::Arc;

use axum::Router;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{DEFAULT_MODEL, DEFAULT_SESSIONS_URL, DEFAULT_VOICE, GatewayConfig};
use crate::Result;

/// Shared state for API handlers
pub struct ApiState {
    /// Server-held long-lived API key
    pub api_key: Option<SecretString>,
    /// Wake word engine access key
    pub wake_word_key: Option<SecretString>,
    /// Upstream endpoint minting ephemeral credentials
    pub sessions_url: String,
    /// Model requested for new sessions
    pub model: String,
    /// Voice requested for new sessions
    pub voice: String,
    /// Client for upstream calls
    pub http: reqwest::Client,
    /// Limiter guarding the credential routes
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    port: u16,
    api_key: Option<SecretString>,
    wake_word_key: Option<SecretString>,
    sessions_url: String,
    model: String,
    voice: String,
    requests_per_minute: Option<u32>,
    http: Option<reqwest::Client>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            api_key: None,
            wake_word_key: None,
            sessions_url: DEFAULT_SESSIONS_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            requests_per_minute: None,
            http: None,
        }
    }

    /// Start from the gateway section of the configuration
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.port)
            .api_key(config.api_key.clone())
            .wake_word_key(config.wake_word_key.clone())
            .sessions_url(config.sessions_url.clone())
            .model(config.model.clone())
            .voice(config.voice.clone())
            .requests_per_minute(Some(config.requests_per_minute))
    }

    /// Set the listen port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the server-held API key
    #[must_use]
    pub fn api_key(mut self, key: Option<SecretString>) -> Self {
        self.api_key = key;
        self
    }

    /// Set the wake word engine access key
    #[must_use]
    pub fn wake_word_key(mut self, key: Option<SecretString>) -> Self {
        self.wake_word_key = key;
        self
    }

    /// Set the upstream sessions endpoint
    #[must_use]
    pub fn sessions_url(mut self, url: impl Into<String>) -> Self {
        self.sessions_url = url.into();
        self
    }

    /// Set the model requested for new sessions
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the voice requested for new sessions
    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Limit credential requests per minute; `None` disables limiting
    #[must_use]
    pub const fn requests_per_minute(mut self, rpm: Option<u32>) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    /// Reuse an HTTP client for upstream calls
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let state = Arc::new(ApiState {
            api_key: self.api_key,
            wake_word_key: self.wake_word_key,
            sessions_url: self.sessions_url,
            model: self.model,
            voice: self.voice,
            http: self.http.unwrap_or_default(),
            rate_limiter: self.requests_per_minute.map(rate_limit::create_limiter),
        });

        ApiServer {
            state,
            port: self.port,
        }
    }
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let credentials = token::router()
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                rate_limit::rate_limit_middleware,
            ))
            .with_state(self.state.clone());

        // CORS layer for cross-origin requests from the browser client
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .merge(credentials)
            .merge(health::router())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        if self.state.api_key.is_none() {
            tracing::warn!("no server API key configured; clients must supply their own");
        }
        if self.state.wake_word_key.is_none() {
            tracing::warn!("no wake word access key configured");
        }

        let port = listener.local_addr().map(|a| a.port()).unwrap_or(self.port);
        tracing::info!(port, "credential gateway listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
