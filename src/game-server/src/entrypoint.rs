use std::{net::SocketAddr, time::Duration};

use agent::strategy::{RandomMove, StrategyFactory};
use common::websocket::WebsocketHandler;
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, Level};

use super::error::{GameServerError, Result};
use super::model::internal::SessionRequest;
use super::service::game_manager::{GameManager, RevealTiming};
use super::service::game_socket::GameSocket;

#[derive(Debug, Clone)]
pub struct GameServerConfig {
    pub socket_address: String,
    pub rest_address: String,
    pub reveal_delay: Duration,
    pub input_cooldown: Duration,
    pub seed: Option<u64>,
}

impl Default for GameServerConfig {
    fn default() -> Self {
        GameServerConfig {
            socket_address: "0.0.0.0:3002".to_owned(),
            rest_address: "0.0.0.0:8082".to_owned(),
            reveal_delay: Duration::from_millis(1000),
            input_cooldown: Duration::from_millis(1500),
            seed: None,
        }
    }
}

impl GameServerConfig {
    pub fn timing(&self) -> RevealTiming {
        RevealTiming {
            reveal_delay: self.reveal_delay,
            input_cooldown: self.input_cooldown,
        }
    }

    pub fn strategies(&self) -> StrategyFactory {
        RandomMove::factory(self.seed)
    }
}

/// Where the server actually ended up listening.
#[derive(Debug, Clone, Copy)]
pub struct BoundAddresses {
    pub socket_address: SocketAddr,
    pub rest_address: SocketAddr,
}

async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|source| GameServerError::Bind {
            address: address.to_owned(),
            source,
        })
}

pub async fn serve(
    config: GameServerConfig,
    strategies: StrategyFactory,
    shutdown_receiver: broadcast::Receiver<()>,
    ready_signal: Option<oneshot::Sender<BoundAddresses>>,
) -> Result<()> {
    let ws_listener = bind(&config.socket_address).await?;
    let rest_listener = bind(&config.rest_address).await?;
    let addresses = BoundAddresses {
        socket_address: ws_listener.local_addr()?,
        rest_address: rest_listener.local_addr()?,
    };

    let mut manager_shutdown_receiver = shutdown_receiver.resubscribe();
    let mut socket_shutdown_receiver = shutdown_receiver.resubscribe();
    let (to_manager, from_clients) = mpsc::channel::<SessionRequest>(100);

    // Single owner of every game session
    let manager = GameManager::new(config.timing(), strategies, to_manager.clone());
    let manager_handle: JoinHandle<()> = tokio::spawn(async move {
        manager
            .run(&mut manager_shutdown_receiver, from_clients)
            .await
    });
    // Websocket handler - route client to its session
    let socket = GameSocket::new(to_manager.clone());
    let websocket_handle: JoinHandle<()> = tokio::spawn(async move {
        socket
            .listen(ws_listener, &mut socket_shutdown_receiver)
            .await
    });
    // REST endpoint: read or reset a session
    let rest_handle = tokio::spawn(GameManager::rest_endpoint_thread(
        rest_listener,
        shutdown_receiver,
        to_manager,
    ));

    // Signal that the server is ready
    if let Some(ready_signal) = ready_signal {
        info!("Sent ready");
        if ready_signal.send(addresses).is_err() {
            info!("Nobody waiting for the ready signal");
        }
    }

    websocket_handle.await?;
    manager_handle.await?;
    rest_handle.await??;
    Ok(())
}

/// An in-process server on random local ports.
pub struct GameServer {
    pub socket_address: String,
    pub rest_address: String,
    shutdown_sender: broadcast::Sender<()>,
    handle: JoinHandle<Result<()>>,
}
impl GameServer {
    pub async fn start(config: GameServerConfig, strategies: StrategyFactory) -> Result<Self> {
        // Init logging, ignore error if already set
        let _ = tracing_subscriber::fmt()
            .with_line_number(true)
            .with_file(true)
            .with_max_level(Level::DEBUG)
            .try_init();

        let config = GameServerConfig {
            socket_address: "127.0.0.1:0".to_owned(),
            rest_address: "127.0.0.1:0".to_owned(),
            ..config
        };
        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        let (ready_sender, ready_receiver) = oneshot::channel();
        let handle = tokio::spawn(serve(
            config,
            strategies,
            shutdown_receiver,
            Some(ready_sender),
        ));

        // Wait for server to be ready
        let Ok(addresses) = ready_receiver.await else {
            return Err(match handle.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => GameServerError::NotReady,
                Err(e) => GameServerError::Task(e),
            });
        };

        Ok(GameServer {
            socket_address: addresses.socket_address.to_string(),
            rest_address: addresses.rest_address.to_string(),
            shutdown_sender,
            handle,
        })
    }

    pub async fn shutdown(self) -> Result<()> {
        if self.shutdown_sender.send(()).is_err() {
            info!("Server already stopped");
        }
        self.handle.await?
    }
}
