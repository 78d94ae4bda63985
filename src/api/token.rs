//! Credential endpoints
//!
//! - `GET /api-key-status` reports whether the server holds its own key
//! - `GET|POST /token` mints an ephemeral session credential upstream
//! - `POST /wake-word/init` hands out the wake word engine key

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Value, json};

use super::ApiState;

/// Build the credential router
pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api-key-status", get(api_key_status))
        .route("/token", get(token).post(token))
        .route("/wake-word/init", post(wake_word_init))
}

/// Server key availability
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyStatus {
    pub has_server_key: bool,
}

async fn api_key_status(State(state): State<Arc<ApiState>>) -> Json<ApiKeyStatus> {
    Json(ApiKeyStatus {
        has_server_key: state.api_key.is_some(),
    })
}

/// Bearer token from the `Authorization` header, if any
fn bearer_override(headers: &HeaderMap) -> Option<SecretString> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, key)| key.trim())
        .filter(|key| !key.is_empty())
        .map(SecretString::from)
}

/// Mint an ephemeral credential
///
/// A caller-supplied bearer key wins over the server key. The upstream body
/// and status are relayed as-is.
async fn token(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let caller_key = bearer_override(&headers);
    let using_override = caller_key.is_some();
    let key = caller_key
        .as_ref()
        .or(state.api_key.as_ref())
        .ok_or(GatewayError::NoApiKey)?;

    let response = state
        .http
        .post(&state.sessions_url)
        .bearer_auth(key.expose_secret())
        .json(&json!({
            "model": state.model,
            "voice": state.voice,
        }))
        .send()
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;

    if status.is_success() {
        tracing::debug!(using_override, "ephemeral credential minted");
    } else {
        tracing::warn!(%status, using_override, "upstream refused session request");
    }

    Ok((status, Json(body)).into_response())
}

/// Wake word engine key response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeWordKey {
    pub access_key: String,
}

async fn wake_word_init(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<WakeWordKey>, GatewayError> {
    let key = state
        .wake_word_key
        .as_ref()
        .ok_or(GatewayError::NoWakeWordKey)?;

    Ok(Json(WakeWordKey {
        access_key: key.expose_secret().to_string(),
    }))
}

/// Credential endpoint errors
#[derive(Debug)]
pub enum GatewayError {
    NoApiKey,
    NoWakeWordKey,
    Upstream(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        let (status, error) = match self {
            Self::NoApiKey => (
                StatusCode::UNAUTHORIZED,
                "No API key available. Please provide your own key or contact the administrator.",
            ),
            Self::NoWakeWordKey => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Wake word access key is not configured",
            ),
            Self::Upstream(reason) => {
                tracing::error!(%reason, "token generation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to generate token",
                )
            }
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
