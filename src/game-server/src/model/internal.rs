use common::model::messages::Id;
use tokio::sync::{mpsc::Sender, oneshot};

use super::external::{ClientRequest, ClientResponse};
use crate::service::game_session::{RoundOutcome, SessionSnapshot};

// Types
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    pub id: Id,
    pub sender: Sender<ClientResponse>,
}

// Messages handled by the game manager
#[derive(Debug)]
pub enum SessionRequest {
    Client {
        player: PlayerHandle,
        request: ClientRequest,
    },
    // Scheduled by the manager itself once the reveal delay elapses
    Reveal {
        user: Id,
        generation: u64,
        outcome: RoundOutcome,
    },
    // Scheduled by the manager itself once the input cool-down elapses
    Release {
        user: Id,
        generation: u64,
        round: u64,
    },
    Snapshot {
        user: Id,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    ResetSession {
        user: Id,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Disconnect {
        user: Id,
    },
}
