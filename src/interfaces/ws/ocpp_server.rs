//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{charge_point_id}`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::commands::SharedCommandSender;
use crate::application::session::SharedSessionRegistry;
use crate::application::{OcppHandlerV16, SharedCentralSystem};
use crate::config::ServerConfig;
use crate::support::shutdown::ShutdownSignal;

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

type ServerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Everything a connection task needs, cloned per connection.
#[derive(Clone)]
struct ConnectionContext {
    central_system: SharedCentralSystem,
    session_registry: SharedSessionRegistry,
    command_sender: SharedCommandSender,
    shutdown: Option<ShutdownSignal>,
}

/// OCPP WebSocket Server
pub struct OcppServer {
    config: ServerConfig,
    context: ConnectionContext,
    next_connection_id: AtomicU64,
}

impl OcppServer {
    pub fn new(
        config: ServerConfig,
        central_system: SharedCentralSystem,
        session_registry: SharedSessionRegistry,
        command_sender: SharedCommandSender,
    ) -> Self {
        Self {
            config,
            context: ConnectionContext {
                central_system,
                session_registry,
                command_sender,
                shutdown: None,
            },
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Set the shutdown signal for graceful shutdown
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.context.shutdown = Some(signal);
        self
    }

    /// Start the WebSocket server
    pub async fn run(&self) -> ServerResult {
        let addr = self.config.address();
        let listener = TcpListener::bind(&addr).await?;

        info!("OCPP 1.6 Central System listening on ws://{}", addr);
        info!(
            "Charge points should connect to: ws://{}/ocpp/{{charge_point_id}}",
            addr
        );

        match self.context.shutdown.clone() {
            Some(shutdown) => self.run_with_shutdown(listener, shutdown).await,
            None => self.run_loop(listener).await,
        }
    }

    async fn run_loop(&self, listener: TcpListener) -> ServerResult {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.spawn_connection(stream, addr),
                Err(e) => self.context.central_system.on_transport_error(&e),
            }
        }
    }

    async fn run_with_shutdown(&self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => self.context.central_system.on_transport_error(&e),
                    }
                }
                _ = shutdown.notified().wait() => {
                    info!("WebSocket server received shutdown signal");
                    self.graceful_shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let context = self.context.clone();
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, connection_id, context.clone()).await {
                warn!("Connection error from {}: {}", addr, e);
                context.central_system.on_transport_error(e.as_ref());
            }
        });
    }

    async fn graceful_shutdown(&self) {
        let connected = self.context.session_registry.connected_ids();
        if !connected.is_empty() {
            info!(count = connected.len(), "Closing charge point connections");
        }

        // Connection tasks observe the same signal and clean up themselves.
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

        info!("WebSocket server shutdown complete");
    }

    pub fn session_registry(&self) -> &SharedSessionRegistry {
        &self.context.session_registry
    }
}

/// Extract charge point ID from WebSocket request path.
/// Expected format: /ocpp/{charge_point_id} or /{charge_point_id}
fn extract_charge_point_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_start_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
        return None;
    }

    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}

fn offers_subprotocol(header: &str) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|p| p.eq_ignore_ascii_case(OCPP_SUBPROTOCOL))
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: u64,
    context: ConnectionContext,
) -> ServerResult {
    debug!("New connection from: {}", addr);

    let mut charge_point_id: Option<String> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            debug!("WebSocket handshake from: {}, path: {}", addr, path);

            let requested_protocols = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            if offers_subprotocol(requested_protocols) {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static(OCPP_SUBPROTOCOL),
                );
            } else if !requested_protocols.is_empty() {
                warn!(
                    "Client does not support ocpp1.6, requested: {}",
                    requested_protocols
                );
            }

            charge_point_id = extract_charge_point_id(path);
            Ok(response)
        },
    )
    .await?;

    let charge_point_id = charge_point_id.unwrap_or_else(|| format!("CP_{}", addr.port()));
    info!(charge_point_id = charge_point_id.as_str(), connection_id, %addr, "Connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if context
        .session_registry
        .register(&charge_point_id, connection_id, tx)
        .is_some()
    {
        // Pending calls were sent over the replaced socket.
        context.command_sender.cleanup_charge_point(&charge_point_id);
    }
    context.central_system.on_link_connected(&charge_point_id).await;

    let handler = Arc::new(OcppHandlerV16::new(
        charge_point_id.clone(),
        context.central_system.clone(),
        context.command_sender.clone(),
    ));

    // Outgoing message sender task
    let cp_id_send = charge_point_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            debug!("[{}] -> {}", cp_id_send, msg);
            if let Err(e) = ws_sender.send(Message::Text(msg)).await {
                error!("[{}] Send error: {}", cp_id_send, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Incoming message receiver task
    let cp_id_recv = charge_point_id.clone();
    let session_reg = context.session_registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!("[{}] <- {}", cp_id_recv, text);
                    session_reg.touch(&cp_id_recv);

                    // A Call may await outbound confirmations; answer it off
                    // the read loop so those confirmations can still arrive.
                    let handler = handler.clone();
                    let session_reg = session_reg.clone();
                    let cp_id = cp_id_recv.clone();
                    tokio::spawn(async move {
                        if let Some(response) = handler.handle(&text).await {
                            if let Err(e) = session_reg.send_to(&cp_id, response) {
                                warn!("[{}] Failed to send response: {}", cp_id, e);
                            }
                        }
                    });
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    session_reg.touch(&cp_id_recv);
                }
                Ok(Message::Close(frame)) => {
                    debug!("[{}] Close frame received: {:?}", cp_id_recv, frame);
                    break;
                }
                Ok(Message::Binary(data)) => {
                    warn!(
                        "[{}] Binary message received ({} bytes), ignoring",
                        cp_id_recv,
                        data.len()
                    );
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    warn!("[{}] WebSocket error: {}", cp_id_recv, e);
                    break;
                }
            }
        }
    });

    // Wait for tasks or shutdown
    match context.shutdown {
        Some(shutdown) => {
            tokio::select! {
                _ = &mut send_task => {},
                _ = &mut recv_task => {},
                _ = shutdown.notified().wait() => {
                    info!("[{}] Connection closing due to server shutdown", charge_point_id);
                }
            }
        }
        None => {
            tokio::select! {
                _ = &mut send_task => {},
                _ = &mut recv_task => {},
            }
        }
    }
    send_task.abort();
    recv_task.abort();

    // A reconnect may already own the session; leave it alone then.
    if context.session_registry.unregister(&charge_point_id, connection_id) {
        context.command_sender.cleanup_charge_point(&charge_point_id);
        context.central_system.on_link_disconnected(&charge_point_id).await;
        info!(charge_point_id = charge_point_id.as_str(), connection_id, "Disconnected");
    } else {
        debug!(
            charge_point_id = charge_point_id.as_str(),
            connection_id, "Superseded connection closed"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_point_id_from_path() {
        assert_eq!(extract_charge_point_id("/ocpp/CP001"), Some("CP001".into()));
        assert_eq!(extract_charge_point_id("/ocpp//CP001"), Some("CP001".into()));
        assert_eq!(extract_charge_point_id("/CP002"), Some("CP002".into()));
        assert_eq!(extract_charge_point_id("/ocpp/"), None);
        assert_eq!(extract_charge_point_id("/ocpp/a/b"), None);
        assert_eq!(extract_charge_point_id("/"), None);
        assert_eq!(extract_charge_point_id("/a/b"), None);
    }

    #[test]
    fn subprotocol_negotiation() {
        assert!(offers_subprotocol("ocpp1.6"));
        assert!(offers_subprotocol("ocpp2.0.1, ocpp1.6"));
        assert!(offers_subprotocol("OCPP1.6"));
        assert!(!offers_subprotocol("ocpp2.0.1"));
        assert!(!offers_subprotocol(""));
    }
}
