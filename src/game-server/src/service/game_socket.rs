use std::sync::Arc;

use async_trait::async_trait;
use common::{
    model::messages::Id,
    websocket::{Connection, WebSocketState, WebsocketHandler},
};
use tokio::sync::{mpsc::Sender, Mutex};
use tracing::error;

use crate::model::{
    external::{ClientRequest, ClientResponse},
    internal::{PlayerHandle, SessionRequest},
};

/// Routes each client's requests to its session in the game manager.
#[derive(Clone)]
pub struct GameSocket {
    state: Arc<Mutex<WebSocketState<ClientResponse>>>,
    to_manager: Sender<SessionRequest>,
}
impl GameSocket {
    pub fn new(to_manager: Sender<SessionRequest>) -> Self {
        Self {
            state: Arc::new(Mutex::new(WebSocketState::new())),
            to_manager,
        }
    }

    async fn forward(&self, request: SessionRequest) {
        if let Err(e) = self.to_manager.send(request).await {
            error!("Game manager is gone, dropped {:?}", e.0);
        }
    }
}

#[async_trait]
impl WebsocketHandler<ClientRequest, ClientResponse> for GameSocket {
    fn get_state(&self) -> Arc<Mutex<WebSocketState<ClientResponse>>> {
        self.state.clone()
    }

    async fn respond_to_request(
        &self,
        connection: &Connection<ClientResponse>,
        request: ClientRequest,
    ) -> Option<ClientResponse> {
        // The manager answers through the player's socket channel
        let request = SessionRequest::Client {
            player: PlayerHandle {
                id: connection.user_id,
                sender: connection.to_socket.clone(),
            },
            request,
        };
        self.forward(request).await;
        None
    }

    fn invalid_request(reason: String) -> Option<ClientResponse> {
        Some(ClientResponse::InvalidRequest { reason })
    }

    async fn on_disconnect(&self, user_id: Id) {
        self.forward(SessionRequest::Disconnect { user: user_id })
            .await;
    }
}
