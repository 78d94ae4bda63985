//! Credential gateway integration tests

use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    routing::post,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;
use vienta::api::ApiServerBuilder;
use vienta::realtime::{HttpSignaling, SessionDescription, SignalingClient};
use vienta::{CredentialGateway, EphemeralCredential, Error, HttpCredentialGateway};

/// What the mock upstream saw
#[derive(Default)]
struct Seen {
    authorization: Vec<String>,
    bodies: Vec<String>,
    queries: Vec<String>,
    content_types: Vec<String>,
}

type SharedSeen = Arc<Mutex<Seen>>;

fn record(seen: &SharedSeen, headers: &HeaderMap, body: String) {
    let value_of = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let mut seen = seen.lock().unwrap();
    seen.authorization.push(value_of(header::AUTHORIZATION));
    seen.content_types.push(value_of(header::CONTENT_TYPE));
    seen.bodies.push(body);
}

/// Serve `router` on an ephemeral local port and return its base URL
async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Mock of the upstream session endpoint; keys starting with `sk-bad` are refused
async fn mock_upstream() -> (String, SharedSeen) {
    async fn sessions(
        State(seen): State<SharedSeen>,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, Json<Value>) {
        record(&seen, &headers, body);
        let refused = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Bearer sk-bad"));
        if refused {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": {
                        "message": "Incorrect API key provided",
                        "type": "invalid_request_error",
                    }
                })),
            );
        }
        (
            StatusCode::OK,
            Json(json!({
                "id": "sess_001",
                "client_secret": {
                    "value": "ek_test_123",
                    "expires_at": 1_700_000_000,
                },
            })),
        )
    }

    let seen = SharedSeen::default();
    let router = Router::new()
        .route("/v1/realtime/sessions", post(sessions))
        .with_state(seen.clone());
    let base = serve(router).await;
    (format!("{base}/v1/realtime/sessions"), seen)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_to(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = ApiServerBuilder::new(0).build().router();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_api_key_status() {
    let without = ApiServerBuilder::new(0).build().router();
    let json = body_json(without.oneshot(get("/api-key-status")).await.unwrap()).await;
    assert_eq!(json["hasServerKey"], false);

    let with = ApiServerBuilder::new(0)
        .api_key(Some(SecretString::from("sk-server")))
        .build()
        .router();
    let json = body_json(with.oneshot(get("/api-key-status")).await.unwrap()).await;
    assert_eq!(json["hasServerKey"], true);
}

#[tokio::test]
async fn test_token_without_any_key() {
    let app = ApiServerBuilder::new(0).build().router();

    let response = app.oneshot(post_to("/token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert_eq!(
        json["error"],
        "No API key available. Please provide your own key or contact the administrator."
    );
}

#[tokio::test]
async fn test_token_relays_upstream_with_server_key() {
    let (sessions_url, seen) = mock_upstream().await;
    let app = ApiServerBuilder::new(0)
        .api_key(Some(SecretString::from("sk-server")))
        .sessions_url(sessions_url)
        .model("gpt-4o-realtime-preview")
        .voice("sol")
        .build()
        .router();

    let response = app.oneshot(get("/token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["client_secret"]["value"], "ek_test_123");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.authorization, vec!["Bearer sk-server"]);
    let upstream_body: Value = serde_json::from_str(&seen.bodies[0]).unwrap();
    assert_eq!(upstream_body["model"], "gpt-4o-realtime-preview");
    assert_eq!(upstream_body["voice"], "sol");
}

#[tokio::test]
async fn test_token_caller_key_overrides_server_key() {
    let (sessions_url, seen) = mock_upstream().await;
    let app = ApiServerBuilder::new(0)
        .api_key(Some(SecretString::from("sk-server")))
        .sessions_url(sessions_url)
        .build()
        .router();

    let request = Request::builder()
        .method("POST")
        .uri("/token")
        .header(header::AUTHORIZATION, "Bearer sk-user")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(seen.lock().unwrap().authorization, vec!["Bearer sk-user"]);
}

#[tokio::test]
async fn test_token_relays_upstream_refusal() {
    let (sessions_url, _seen) = mock_upstream().await;
    let app = ApiServerBuilder::new(0)
        .api_key(Some(SecretString::from("sk-bad-key")))
        .sessions_url(sessions_url)
        .build()
        .router();

    let response = app.oneshot(post_to("/token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["message"], "Incorrect API key provided");
}

#[tokio::test]
async fn test_token_upstream_unreachable() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let app = ApiServerBuilder::new(0)
        .api_key(Some(SecretString::from("sk-server")))
        .sessions_url(format!("http://{addr}/v1/realtime/sessions"))
        .build()
        .router();

    let response = app.oneshot(post_to("/token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Failed to generate token");
}

#[tokio::test]
async fn test_wake_word_init() {
    let app = ApiServerBuilder::new(0)
        .wake_word_key(Some(SecretString::from("wk_abc")))
        .build()
        .router();
    let response = app.oneshot(post_to("/wake-word/init")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["accessKey"], "wk_abc");

    let app = ApiServerBuilder::new(0).build().router();
    let response = app.oneshot(post_to("/wake-word/init")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await["error"],
        "Wake word access key is not configured"
    );
}

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let app = ApiServerBuilder::new(0)
        .requests_per_minute(Some(1))
        .build()
        .router();

    let first = app.clone().oneshot(get("/api-key-status")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(get("/api-key-status")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    // Health is never limited
    let health = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_client_gets_credential_through_gateway() {
    let (sessions_url, _seen) = mock_upstream().await;
    let gateway_url = serve(
        ApiServerBuilder::new(0)
            .api_key(Some(SecretString::from("sk-server")))
            .wake_word_key(Some(SecretString::from("wk_abc")))
            .sessions_url(sessions_url)
            .build()
            .router(),
    )
    .await;
    let client = HttpCredentialGateway::new(format!("{gateway_url}/"));

    let credential = client.ephemeral_credential(None).await.unwrap();
    assert_eq!(credential.secret().expose_secret(), "ek_test_123");
    assert_eq!(
        credential.expires_at().map(|t| t.timestamp()),
        Some(1_700_000_000)
    );

    let key = client.wake_word_key().await.unwrap();
    assert_eq!(key.expose_secret(), "wk_abc");
}

#[tokio::test]
async fn test_client_reports_gateway_refusal() {
    let gateway_url = serve(ApiServerBuilder::new(0).build().router()).await;
    let client = HttpCredentialGateway::new(gateway_url);

    match client.ephemeral_credential(None).await {
        Err(Error::Unauthorized(message)) => {
            assert!(message.starts_with("No API key available"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(matches!(
        client.wake_word_key().await,
        Err(Error::DetectorConfig(_))
    ));
}

#[tokio::test]
async fn test_client_rejects_malformed_gateway_response() {
    let router = Router::new().route("/token", post(|| async { "<html>ok</html>" }));
    let client = HttpCredentialGateway::new(serve(router).await);

    match client.ephemeral_credential(None).await {
        Err(Error::NegotiationFailed(message)) => {
            assert!(message.starts_with("malformed gateway response"), "{message}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_token_ignores_non_bearer_authorization() {
    let app = ApiServerBuilder::new(0).build().router();

    let request = Request::builder()
        .method("POST")
        .uri("/token")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_client_override_key_reaches_upstream() {
    let (sessions_url, seen) = mock_upstream().await;
    let gateway_url = serve(
        ApiServerBuilder::new(0)
            .sessions_url(sessions_url)
            .build()
            .router(),
    )
    .await;
    let client = HttpCredentialGateway::new(gateway_url);

    let key = SecretString::from("sk-user");
    client.ephemeral_credential(Some(&key)).await.unwrap();
    assert_eq!(seen.lock().unwrap().authorization, vec!["Bearer sk-user"]);
}

/// Mock signaling endpoint answering every offer
async fn mock_signaling(status: StatusCode) -> (String, SharedSeen) {
    async fn answer(
        State((seen, status)): State<(SharedSeen, StatusCode)>,
        axum::extract::RawQuery(query): axum::extract::RawQuery,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, String) {
        seen.lock()
            .unwrap()
            .queries
            .push(query.unwrap_or_default());
        record(&seen, &headers, body);
        (status, "v=0\r\no=- answer\r\n".to_string())
    }

    let seen = SharedSeen::default();
    let router = Router::new()
        .route("/v1/realtime", post(answer))
        .with_state((seen.clone(), status));
    let base = serve(router).await;
    (format!("{base}/v1/realtime"), seen)
}

#[tokio::test]
async fn test_signaling_exchange() {
    let (url, seen) = mock_signaling(StatusCode::CREATED).await;
    let signaling = HttpSignaling::new(&url, "gpt-4o-realtime-preview").unwrap();
    let credential = EphemeralCredential::new(SecretString::from("ek_test_123"), None);

    let answer = signaling
        .exchange(&SessionDescription::offer("v=0\r\no=- offer\r\n"), &credential)
        .await
        .unwrap();
    assert_eq!(answer, SessionDescription::answer("v=0\r\no=- answer\r\n"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.queries, vec!["model=gpt-4o-realtime-preview"]);
    assert_eq!(seen.authorization, vec!["Bearer ek_test_123"]);
    assert_eq!(seen.content_types, vec!["application/sdp"]);
    assert_eq!(seen.bodies, vec!["v=0\r\no=- offer\r\n"]);
}

#[tokio::test]
async fn test_signaling_rejection() {
    let (url, _seen) = mock_signaling(StatusCode::BAD_REQUEST).await;
    let signaling = HttpSignaling::new(&url, "gpt-4o-realtime-preview").unwrap();
    let credential = EphemeralCredential::new(SecretString::from("ek_test_123"), None);

    let err = signaling
        .exchange(&SessionDescription::offer("v=0"), &credential)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NegotiationFailed(_)));
}
