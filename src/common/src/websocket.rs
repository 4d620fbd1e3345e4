use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, Mutex},
};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        self,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::model::messages::{Id, OpenSocketRequest, SocketRequest, SocketResponse};

const OUTBOUND_BUFFER: usize = 100;
const DROPPED_AFTER_SEND: (CloseCode, &str) = (
    CloseCode::Normal,
    "Decided to close after sending the previous message",
);

type SocketWriteHandle = SplitSink<WebSocketStream<TcpStream>, Message>;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("could not serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("connection closed before the user identified itself")]
    Unidentified,
}

/// A user's live socket. Anything sent on `to_socket` is pushed to the client.
#[derive(Clone)]
pub struct Connection<RS> {
    pub user_id: Id,
    pub to_socket: mpsc::Sender<RS>,
}

pub struct WebSocketState<T> {
    user_handles: HashMap<Id, Connection<T>>,
}
impl<T> WebSocketState<T> {
    pub fn new() -> Self {
        WebSocketState {
            user_handles: HashMap::new(),
        }
    }
}

impl<T> Default for WebSocketState<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait WebsocketHandler<ExternalRQ, ExternalRS>
where
    Self: Clone + Send + Sync + 'static,
    ExternalRQ: for<'de> Deserialize<'de> + Send + 'static,
    ExternalRS: Clone + Send + Sync + Serialize + 'static,
{
    fn get_state(&self) -> Arc<Mutex<WebSocketState<ExternalRS>>>;

    async fn listen(
        &self,
        ws_listener: TcpListener,
        shutdown_receiver: &mut broadcast::Receiver<()>,
    ) {
        match ws_listener.local_addr() {
            Ok(address) => info!("Initialized ws listener: {}", address),
            Err(e) => warn!("Initialized ws listener on unknown address: {}", e),
        }
        loop {
            let connection_shutdown = shutdown_receiver.resubscribe();
            tokio::select! {
                result = ws_listener.accept() => {
                    match result {
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                        Ok((stream, address)) => {
                            tokio::spawn(self.clone().connection_thread(
                                stream,
                                address,
                                connection_shutdown,
                            ));
                        }
                    }
                },
                _ = shutdown_receiver.recv() => {
                    break;
                }
            };
        }
        info!("Exited ws listener");
    }

    // Task owning a single connection for its lifetime
    async fn connection_thread(
        self,
        stream: TcpStream,
        address: SocketAddr,
        mut shutdown_receiver: broadcast::Receiver<()>,
    ) {
        info!("New ws connection: {}", address);

        let stream = match accept_async(stream).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Websocket handshake with {} failed: {}", address, e);
                return;
            }
        };
        let (mut ws_sender, mut ws_receiver) = stream.split();

        // The first message sent is always the user's id
        let user_id = match identify(&mut ws_receiver).await {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!("Dropping {}: {}", address, e);
                return;
            }
        };

        // A reconnecting user replaces its previous connection
        let (to_socket, mut from_internal) = mpsc::channel(OUTBOUND_BUFFER);
        let connection = Connection {
            user_id,
            to_socket,
        };
        self.get_state()
            .lock()
            .await
            .user_handles
            .insert(user_id, connection.clone());

        debug!("Listening to {}", user_id);
        loop {
            let mut close_reason = None;
            tokio::select! {
                // Messages pushed by the rest of the server
                pushed = from_internal.recv() => {
                    let Some(body) = pushed else {
                        break;
                    };
                    if Self::drop_after_send(&body) {
                        close_reason = Some(DROPPED_AFTER_SEND);
                    }
                    let response = SocketResponse { user_id, message: body };
                    if let Err(e) = send_response(&mut ws_sender, &response).await {
                        warn!("Failed to push to {}: {}", user_id, e);
                        break;
                    }
                }

                // Otherwise, handle incoming messages
                msg = ws_receiver.next() => {
                    let msg = match msg {
                        None => {
                            debug!("Stream for {} ended", user_id);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("Error receiving message from {}: {}", user_id, e);
                            break;
                        }
                        Some(Ok(msg)) => msg,
                    };
                    if msg.is_close() {
                        debug!("{} closed the socket", user_id);
                        break;
                    }
                    let Some(response) = self.handle_external_message(&connection, msg).await else {
                        continue;
                    };
                    if Self::drop_after_send(&response.message) {
                        close_reason = Some(DROPPED_AFTER_SEND);
                    }
                    if let Err(e) = send_response(&mut ws_sender, &response).await {
                        warn!("Failed to respond to {}: {}", user_id, e);
                        break;
                    }
                }

                _ = shutdown_receiver.recv() => {
                    close_reason = Some((CloseCode::Away, "Server is shutting down"));
                }
            };
            if let Some((code, reason)) = close_reason {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                if let Err(e) = ws_sender.send(Message::Close(Some(frame))).await {
                    debug!("Failed to close socket for {}: {}", user_id, e);
                }
                break;
            }
        }

        // Only tear down the user if it hasn't reconnected elsewhere
        let is_current = {
            let state = self.get_state();
            let mut state = state.lock().await;
            let is_current = state
                .user_handles
                .get(&user_id)
                .is_some_and(|current| current.to_socket.same_channel(&connection.to_socket));
            if is_current {
                state.user_handles.remove(&user_id);
            }
            is_current
        };
        if is_current {
            self.on_disconnect(user_id).await;
        }
        info!("Closed ws connection: {}", address);
    }

    // Read message from connection, return immediate response
    async fn handle_external_message(
        &self,
        connection: &Connection<ExternalRS>,
        message: Message,
    ) -> Option<SocketResponse<ExternalRS>> {
        let body = match message {
            Message::Text(body) => body,
            Message::Ping(_) | Message::Pong(_) => return None,
            other => {
                warn!("Got non-text message from {}: {:?}", connection.user_id, other);
                return None;
            }
        };

        let response = match serde_json::from_str::<SocketRequest<ExternalRQ>>(&body) {
            Ok(request) => {
                if let Some(claimed) = request.user_id {
                    if claimed != connection.user_id {
                        warn!(
                            "Connection for {} sent a request as {}",
                            connection.user_id, claimed
                        );
                    }
                }
                self.respond_to_request(connection, request.request).await
            }
            Err(e) => {
                warn!("Rejected request from {}: {}", connection.user_id, e);
                Self::invalid_request(e.to_string())
            }
        };

        response.map(|message| SocketResponse {
            user_id: connection.user_id,
            message,
        })
    }

    // Criterion to drop connection. By default, always keep the connection alive.
    fn drop_after_send(_response: &ExternalRS) -> bool {
        false
    }

    // Reply sent when a request can't be parsed. By default, stay silent.
    fn invalid_request(_reason: String) -> Option<ExternalRS> {
        None
    }

    async fn on_disconnect(&self, _user_id: Id) {}

    // Logic to handle a client's request
    async fn respond_to_request(
        &self,
        connection: &Connection<ExternalRS>,
        request: ExternalRQ,
    ) -> Option<ExternalRS>;
}

async fn identify(
    ws_receiver: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
) -> Result<Id, SocketError> {
    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Error receiving message: {}", e);
                continue;
            }
        };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_text() else {
            warn!("Received non-text message");
            continue;
        };
        match serde_json::from_str::<OpenSocketRequest>(text) {
            Ok(request) => return Ok(request.user_id),
            Err(error) => warn!("Failed to parse identification message: {:?}", error),
        }
    }
    Err(SocketError::Unidentified)
}

async fn send_response<RS: Serialize>(
    ws_sender: &mut SocketWriteHandle,
    response: &SocketResponse<RS>,
) -> Result<(), SocketError> {
    let body = serde_json::to_string(response)?;
    ws_sender.send(Message::Text(body)).await?;
    Ok(())
}
