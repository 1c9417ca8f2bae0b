//! Web server: gateway proxy, reconnection page and live sessions.
//!
//! The proxy endpoints hide the Evolution API key from the browser. The
//! WebSocket endpoint runs a reconnection flow per connected page and streams
//! its snapshots.

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{Message, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::client::ReconnectApi;
use crate::gateway::{GatewayClient, GatewayError, Operation};
use crate::instance;
use crate::reconnect::{PollSchedule, ReconnectEvent, ReconnectTask, ReconnectionFlow};

const INVALID_INSTANCE: &str = "Invalid instance parameter";

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; img-src 'self' data:; \
     style-src 'self' 'unsafe-inline'; script-src 'self'; connect-src 'self' ws: wss:";

/// Shared application state
pub struct AppState {
    /// `None` when the gateway URL or key is missing; proxy calls then answer 500
    pub gateway: Option<GatewayClient>,
    pub web_dir: Option<PathBuf>,
    pub schedule: PollSchedule,
}

impl AppState {
    pub fn new(
        gateway: Option<GatewayClient>,
        web_dir: Option<PathBuf>,
        schedule: PollSchedule,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            web_dir,
            schedule,
        })
    }

    /// Build state from configuration, logging (not failing) on missing credentials.
    pub fn from_config(config: &ServerConfig) -> Arc<Self> {
        let gateway = match GatewayClient::new(&config.gateway) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("{}; proxy endpoints will answer 500", e);
                None
            }
        };
        Self::new(gateway, config.web_dir.clone(), config.schedule.clone())
    }
}

/// Query parameters shared by every instance endpoint
#[derive(Debug, Deserialize)]
struct InstanceQuery {
    instance: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    gateway_configured: bool,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Create the web server router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        // API routes
        .route("/api/connectionState", get(get_connection_state))
        .route("/api/connect", get(get_connect))
        .route("/api/health", get(get_health))
        // WebSocket
        .route("/ws", get(websocket_handler));

    // Serve the page, falling back to index.html for client-side routes
    if let Some(web_dir) = &state.web_dir {
        let serve_dir = ServeDir::new(web_dir).fallback(ServeFile::new(web_dir.join("index.html")));
        router = router.fallback_service(serve_dir);
    }

    router
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Start the web server, stopping when `shutdown` resolves
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let router = create_router(state);

    info!("Web server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// API Handlers

async fn get_connection_state(
    State(state): State<Arc<AppState>>,
    query: Result<Query<InstanceQuery>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(query)) => {
            forward(&state, Operation::ConnectionState, query.instance.as_deref()).await
        }
        Err(rejection) => reject_query(rejection),
    }
}

async fn get_connect(
    State(state): State<Arc<AppState>>,
    query: Result<Query<InstanceQuery>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(query)) => forward(&state, Operation::Connect, query.instance.as_deref()).await,
        Err(rejection) => reject_query(rejection),
    }
}

/// Malformed query strings get the same JSON 400 as a bad identifier.
fn reject_query(rejection: QueryRejection) -> Response {
    debug!("Rejected query string: {}", rejection);
    error_response(StatusCode::BAD_REQUEST, INVALID_INSTANCE)
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        gateway_configured: state.gateway.is_some(),
    })
}

/// Validate, forward one request to the gateway and translate the outcome.
async fn forward(state: &AppState, op: Operation, raw_instance: Option<&str>) -> Response {
    let Some(instance) = instance::validate_query_param(raw_instance) else {
        return error_response(StatusCode::BAD_REQUEST, INVALID_INSTANCE);
    };

    let Some(gateway) = state.gateway.as_ref() else {
        error!("Gateway credentials missing, refusing {}", op.path_segment());
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error");
    };

    match gateway.fetch(op, &instance).await {
        Ok(upstream) => {
            let content_type = upstream
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
                .unwrap_or_else(|| HeaderValue::from_static("application/json"));
            (
                upstream.status,
                [(header::CONTENT_TYPE, content_type)],
                upstream.body,
            )
                .into_response()
        }
        Err(GatewayError::Timeout) => {
            warn!("Gateway {} for {} timed out", op.path_segment(), instance);
            error_response(StatusCode::GATEWAY_TIMEOUT, op.timeout_message())
        }
        Err(GatewayError::Status { status, message }) => {
            error!(
                "Gateway {} for {} returned {}",
                op.path_segment(),
                instance,
                status
            );
            let message = message.unwrap_or_else(|| op.gateway_error_message(status.as_u16()));
            error_response(status, message)
        }
        Err(GatewayError::Transport(e)) => {
            error!("Gateway {} for {} failed: {}", op.path_segment(), instance, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, op.internal_error_message())
        }
    }
}

// WebSocket handler

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    query: Result<Query<InstanceQuery>, QueryRejection>,
) -> Response {
    let instance = match query {
        Ok(Query(query)) => query.instance.unwrap_or_default(),
        Err(rejection) => return reject_query(rejection),
    };
    ws.on_upgrade(move |socket| async move {
        let session_id = uuid::Uuid::new_v4();
        let (mut sender, receiver) = socket.split();

        let Some(gateway) = state.gateway.clone() else {
            error!("Session {}: gateway credentials missing", session_id);
            let body = serde_json::json!({ "type": "error", "error": "Server configuration error" });
            let _ = sender.send(Message::Text(body.to_string())).await;
            return;
        };

        run_session(
            session_id,
            gateway,
            &instance,
            state.schedule.clone(),
            sender,
            receiver,
        )
        .await;
    })
}

async fn send_event<S>(sender: &mut S, event: &ReconnectEvent) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            true
        }
    }
}

/// Drive one page session: run a flow for `instance`, stream its events and
/// honour `refresh` requests until the socket closes.
async fn run_session<A, S, R>(
    session_id: uuid::Uuid,
    api: A,
    instance: &str,
    schedule: PollSchedule,
    mut sender: S,
    mut receiver: R,
) where
    A: ReconnectApi + 'static,
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    info!("Session {} started for instance {:?}", session_id, instance);

    let flow = Arc::new(ReconnectionFlow::new(api, instance));
    let mut events = flow.subscribe();

    // Send current snapshot before the first check lands
    let initial = ReconnectEvent::Snapshot(flow.snapshot().await);
    if !send_event(&mut sender, &initial).await {
        return;
    }

    let task = ReconnectTask::spawn(flow.clone(), schedule);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Session {} lagged by {} events", session_id, skipped);
                        let latest = ReconnectEvent::Snapshot(flow.snapshot().await);
                        if !send_event(&mut sender, &latest).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) if text.trim() == "refresh" => {
                        task.refresh_qr();
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    task.shutdown().await;
    info!("Session {} closed", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn gateway(url: &str) -> GatewayClient {
        GatewayClient::new(&GatewayConfig {
            base_url: Some(url.to_string()),
            api_key: Some("secret-key".to_string()),
        })
        .unwrap()
    }

    fn app(gateway: Option<GatewayClient>) -> Router {
        create_router(AppState::new(gateway, None, PollSchedule::default()))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_relays_gateway_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/instance/connectionState/shop42")
            .match_header("apikey", "secret-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"instance": {"instanceName": "shop42", "state": "open"}}"#)
            .create_async()
            .await;

        let (status, body) = get_json(
            app(Some(gateway(&server.url()))),
            "/api/connectionState?instance=shop42",
        )
        .await;

        mock.assert_async().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instance"]["state"], "open");
    }

    #[tokio::test]
    async fn test_connect_relays_qr() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/instance/connect/shop42")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"pairingCode": null, "code": "2@abc", "base64": "data:image/png;base64,AAA", "count": 1}"#)
            .create_async()
            .await;

        let (status, body) =
            get_json(app(Some(gateway(&server.url()))), "/api/connect?instance=shop42").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["base64"], "data:image/png;base64,AAA");
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_invalid_instance_is_rejected_without_gateway_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        for uri in [
            "/api/connectionState?instance=",
            "/api/connectionState?instance=%20%20",
            "/api/connectionState",
            "/api/connect?instance=shop%2F42",
            "/api/connect?instance=a%20b",
            "/api/connect?instance=a&instance=b",
            "/api/connectionState?instance=shop42&instance=shop43",
        ] {
            let (status, body) = get_json(app(Some(gateway(&server.url()))), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"], "Invalid instance parameter");
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_configuration_is_500() {
        let (status, body) = get_json(app(None), "/api/connect?instance=shop42").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Server configuration error");
    }

    #[tokio::test]
    async fn test_gateway_errors_are_relayed() {
        let mut server = mockito::Server::new_async().await;
        let _with_message = server
            .mock("GET", "/instance/connect/shop42")
            .with_status(403)
            .with_body(r#"{"error": "Forbidden"}"#)
            .create_async()
            .await;
        let _without_message = server
            .mock("GET", "/instance/connectionState/ghost")
            .with_status(404)
            .create_async()
            .await;
        let _bad_gateway = server
            .mock("GET", "/instance/connectionState/broken")
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create_async()
            .await;

        let (status, body) =
            get_json(app(Some(gateway(&server.url()))), "/api/connect?instance=shop42").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Forbidden");

        let (status, body) = get_json(
            app(Some(gateway(&server.url()))),
            "/api/connectionState?instance=ghost",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Instância não encontrada");

        let (status, body) = get_json(
            app(Some(gateway(&server.url()))),
            "/api/connectionState?instance=broken",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Erro ao verificar estado da conexão: 502");
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_504() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let slow = gateway(&format!("http://{}", addr))
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(100));
        let (status, body) = get_json(app(Some(slow)), "/api/connectionState?instance=shop42").await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            body["error"],
            "Tempo limite excedido ao verificar estado da conexão"
        );
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_500() {
        // Bind and drop to get a port nothing listens on.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let (status, body) = get_json(
            app(Some(gateway(&format!("http://{}", addr)))),
            "/api/connect?instance=shop42",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Erro interno ao conectar instância");
    }

    #[tokio::test]
    async fn test_security_headers_and_health() {
        let response = app(None)
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(headers.contains_key(header::CONTENT_SECURITY_POLICY));
        assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["gatewayConfigured"], false);
    }

    #[tokio::test]
    async fn test_only_get_is_routed() {
        let response = app(None)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/connect?instance=shop42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    mod session {
        use super::*;
        use crate::client::GatewayState;
        use crate::reconnect::testing::{qr, FakeApi};
        use futures::channel::mpsc;

        type Outgoing = mpsc::UnboundedReceiver<Message>;

        async fn next_event(outgoing: &mut Outgoing) -> Value {
            match outgoing.next().await {
                Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected a text frame, got {:?}", other),
            }
        }

        fn schedule() -> PollSchedule {
            PollSchedule {
                poll_interval: Duration::from_secs(5),
                qr_refresh_interval: Duration::from_secs(30),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_session_streams_flow_and_stops_on_close() {
            let api = FakeApi::new()
                .with_states(vec![Ok(GatewayState::Close), Ok(GatewayState::Open)])
                .with_qrs(vec![Ok(qr("abc"))]);
            let (out_tx, mut out_rx) = mpsc::unbounded::<Message>();
            let (in_tx, in_rx) = mpsc::unbounded::<Result<Message, axum::Error>>();

            let session = tokio::spawn(run_session(
                uuid::Uuid::nil(),
                api.clone(),
                "shop42",
                schedule(),
                out_tx,
                in_rx,
            ));

            let initial = next_event(&mut out_rx).await;
            assert_eq!(initial["type"], "snapshot");
            assert_eq!(initial["status"], "checking");
            assert_eq!(initial["instance"], "shop42");

            // First check finds the session closed, then the QR lands.
            let reconnecting = next_event(&mut out_rx).await;
            assert_eq!(reconnecting["status"], "reconnecting");
            assert_eq!(reconnecting["attempts"], 1);
            let with_qr = next_event(&mut out_rx).await;
            assert_eq!(with_qr["qr"]["data"], "abc");
            assert_eq!(api.connect_calls(), 1);

            in_tx
                .unbounded_send(Ok(Message::Text("refresh".to_string())))
                .unwrap();
            let refreshed = next_event(&mut out_rx).await;
            assert_eq!(refreshed["qr"]["data"], "abc");
            assert_eq!(api.connect_calls(), 2);

            // Second check at 5s reports open.
            let connected = next_event(&mut out_rx).await;
            assert_eq!(connected["status"], "connected");
            let notice = next_event(&mut out_rx).await;
            assert_eq!(notice["type"], "connected");
            assert_eq!(notice["instance"], "shop42");

            in_tx
                .unbounded_send(Ok(Message::Close(None)))
                .unwrap();
            session.await.unwrap();

            let (states, connects) = (api.state_calls(), api.connect_calls());
            tokio::time::sleep(Duration::from_secs(120)).await;
            assert_eq!(api.state_calls(), states);
            assert_eq!(api.connect_calls(), connects);
        }

        #[tokio::test(start_paused = true)]
        async fn test_session_with_malformed_instance_reports_error() {
            let api = FakeApi::new();
            let (out_tx, mut out_rx) = mpsc::unbounded::<Message>();
            let (in_tx, in_rx) = mpsc::unbounded::<Result<Message, axum::Error>>();

            let session = tokio::spawn(run_session(
                uuid::Uuid::nil(),
                api.clone(),
                "shop 42",
                schedule(),
                out_tx,
                in_rx,
            ));

            next_event(&mut out_rx).await;
            let failed = next_event(&mut out_rx).await;
            assert_eq!(failed["status"], "error");
            assert_eq!(failed["error"], "Parâmetro de instância inválido");

            drop(in_tx);
            session.await.unwrap();
            assert_eq!(api.state_calls(), 0);
        }
    }
}
