//! Server network layer: WebSocket transport, health check and connection tasks

use crate::client_manager::{ClientHandle, ClientManager, DisconnectReason};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::match_registry::MatchRegistry;
use crate::router::EventRouter;
use crate::session::ConnectionSession;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use shared::{ClientFrame, ErrorEvent, ServerFrame, ERROR};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Outbound frames buffered per connection before new ones are dropped
const SEND_QUEUE_CAPACITY: usize = 256;

/// How long a closing connection may take to flush its queue
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// State shared by every request handler and connection task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub clients: Arc<RwLock<ClientManager>>,
    pub router: Arc<EventRouter>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(MatchRegistry::new());
        Self {
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            config: Arc::new(config),
            router: Arc::new(EventRouter::new(registry)),
        }
    }
}

/// The relay server bound to its listening socket
pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Listening on port {}", listener.local_addr()?.port());

        Ok(Server {
            listener,
            state: AppState::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves until the process is stopped
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then closes every live connection
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timeout_checker = self.spawn_timeout_checker();
        let clients = Arc::clone(&self.state.clients);
        let app = build_router(self.state);

        let result = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Server shutting down");
            for handle in clients.read().await.handles() {
                handle.close(DisconnectReason::ServerShutdown);
            }
        })
        .await;

        timeout_checker.abort();
        result.map_err(ServerError::from)
    }

    /// Spawns task that closes connections which stopped answering pings
    fn spawn_timeout_checker(&self) -> JoinHandle<()> {
        let clients = Arc::clone(&self.state.clients);
        let timeout = self.state.config.ping_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMEOUT_CHECK_INTERVAL);

            loop {
                interval.tick().await;

                let timed_out = clients.read().await.check_timeouts(timeout);
                for handle in timed_out {
                    debug!("Client {} exceeded ping timeout", handle.id);
                    handle.close(DisconnectReason::PingTimeout);
                }
            }
        })
    }
}

/// Builds the HTTP surface: `/health` and the `/ws` upgrade endpoint
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid allowed origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.config.is_origin_allowed(origin) {
        warn!(
            "Rejected upgrade from {}: origin {} not allowed",
            addr,
            origin.unwrap_or("-")
        );
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    ws.on_upgrade(move |socket| handle_socket(socket, addr, forwarded_for, state))
}

/// Runs one connection from admission to cleanup
async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    forwarded_for: Option<String>,
    state: AppState,
) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

    let admitted = state.clients.write().await.add_client(addr, forwarded_for, tx);
    let Some(handle) = admitted else {
        warn!("Refusing connection from {}: server full", addr);
        refuse(&mut ws_tx, "Server full").await;
        return;
    };

    let writer = tokio::spawn(write_loop(ws_tx, rx, state.config.ping_interval));

    let mut session = ConnectionSession::new();
    let reason = read_loop(ws_rx, &handle, &mut session, &state).await;

    state.router.disconnect(&handle, &mut session, reason).await;
    state.clients.write().await.remove_client(&handle.id);

    // The writer stops once the last handle (and with it the sender) is gone
    drop(handle);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("Writer for {} did not finish draining", addr);
    }
}

async fn refuse(ws_tx: &mut SplitSink<WebSocket, Message>, message: &str) {
    let frame = ServerFrame::event(
        ERROR,
        &ErrorEvent {
            message: message.to_string(),
        },
    )
    .and_then(|frame| serde_json::to_string(&frame));

    if let Ok(text) = frame {
        let _ = ws_tx.send(Message::Text(text.into())).await;
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

/// Reads frames until the socket closes or the connection is told to stop
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    handle: &Arc<ClientHandle>,
    session: &mut ConnectionSession,
    state: &AppState,
) -> DisconnectReason {
    let mut closed = handle.closed();

    loop {
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() {
                    return DisconnectReason::ServerShutdown;
                }
                let reason = *closed.borrow();
                if let Some(reason) = reason {
                    return reason;
                }
            }

            message = ws_rx.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!("Error reading from {}: {}", handle.id, e);
                        return DisconnectReason::TransportError;
                    }
                    None => return DisconnectReason::TransportClose,
                };

                handle.touch();

                match message {
                    Message::Text(text) => handle_text(text.as_str(), handle, session, state).await,
                    Message::Close(_) => return DisconnectReason::ClientClose,
                    Message::Binary(_) => debug!("Ignoring binary frame from {}", handle.id),
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }
}

async fn handle_text(
    text: &str,
    handle: &Arc<ClientHandle>,
    session: &mut ConnectionSession,
    state: &AppState,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Malformed frame from {}: {}", handle.id, e);
            return;
        }
    };

    state
        .router
        .dispatch(handle, session, &frame.event, &frame.payload, frame.ack)
        .await;
}

/// Drains the outbound queue to the socket and keeps the connection alive with pings
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the first tick since it fires immediately
    ping.tick().await;

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        debug!("Failed to write frame: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },

            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Err(e) = ws_tx.close().await {
        error!("Failed to close socket: {}", e);
    }
}
