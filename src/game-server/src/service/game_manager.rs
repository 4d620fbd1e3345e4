use std::{collections::HashMap, time::Duration};

use agent::strategy::StrategyFactory;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::model::messages::Id;
use tokio::{
    net::TcpListener,
    sync::{
        broadcast,
        mpsc::{self, error::TrySendError, Receiver, Sender},
        oneshot,
    },
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    model::{
        external::{ClientRequest, ClientResponse},
        internal::{PlayerHandle, SessionRequest},
    },
    service::game_session::{GameSession, RoundOutcome, SessionSnapshot},
};

/// Presentation-side pacing of a round. Never affects scores or history.
#[derive(Debug, Clone, Copy)]
pub struct RevealTiming {
    pub reveal_delay: Duration,
    pub input_cooldown: Duration,
}

struct SessionEntry {
    session: GameSession,
    // Unique per manager, so timers of a dropped session never match its successor
    generation: u64,
    player: Option<PlayerHandle>,
}

impl SessionEntry {
    fn push(&self, response: ClientResponse) {
        let Some(player) = &self.player else {
            return;
        };
        match player.sender.try_send(response) {
            Ok(()) => {}
            Err(TrySendError::Full(response)) => {
                warn!("Outbox for {} is full, dropped {:?}", player.id, response)
            }
            Err(TrySendError::Closed(_)) => debug!("{} is no longer connected", player.id),
        }
    }
}

/// Owns every live session. All access goes through its request channel.
pub struct GameManager {
    timing: RevealTiming,
    strategies: StrategyFactory,
    sessions: HashMap<Id, SessionEntry>,
    sessions_opened: u64,
    to_self: Sender<SessionRequest>,
}

impl GameManager {
    pub fn new(
        timing: RevealTiming,
        strategies: StrategyFactory,
        to_self: Sender<SessionRequest>,
    ) -> Self {
        GameManager {
            timing,
            strategies,
            sessions: HashMap::new(),
            sessions_opened: 0,
            to_self,
        }
    }

    pub async fn run(
        mut self,
        shutdown_receiver: &mut broadcast::Receiver<()>,
        mut requests: Receiver<SessionRequest>,
    ) {
        info!("Initialized game manager");
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    self.handle(request);
                }
                _ = shutdown_receiver.recv() => {
                    break;
                }
            }
        }
        info!("Exiting game manager with {} sessions", self.sessions.len());
    }

    fn handle(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Client { player, request } => self.handle_client(player, request),
            SessionRequest::Reveal {
                user,
                generation,
                outcome,
            } => {
                let Some(entry) = self.sessions.get(&user) else {
                    debug!("Reveal for unknown user {}", user);
                    return;
                };
                if entry.generation != generation
                    || entry.session.round_in_progress() != Some(outcome.round)
                {
                    debug!("Dropping stale reveal of round {} for {}", outcome.round, user);
                    return;
                }
                entry.push(ClientResponse::RoundResult(outcome.into()));
            }
            SessionRequest::Release {
                user,
                generation,
                round,
            } => {
                let Some(entry) = self.sessions.get_mut(&user) else {
                    return;
                };
                if entry.generation == generation && entry.session.finish_round(round) {
                    entry.push(ClientResponse::AwaitingChoice);
                } else {
                    debug!("Dropping stale release of round {} for {}", round, user);
                }
            }
            SessionRequest::Snapshot { user, reply } => {
                let snapshot = self.sessions.get(&user).map(|e| e.session.snapshot());
                if reply.send(snapshot).is_err() {
                    debug!("Snapshot requester for {} went away", user);
                }
            }
            SessionRequest::ResetSession { user, reply } => {
                let snapshot = self.sessions.get_mut(&user).map(|entry| {
                    entry.session.reset();
                    let snapshot = entry.session.snapshot();
                    entry.push(ClientResponse::GameReset(snapshot.clone()));
                    snapshot
                });
                if snapshot.is_some() {
                    info!("Reset session for {}", user);
                }
                if reply.send(snapshot).is_err() {
                    debug!("Reset requester for {} went away", user);
                }
            }
            SessionRequest::Disconnect { user } => {
                if self.sessions.remove(&user).is_some() {
                    info!("Closed session for {}", user);
                }
            }
        }
    }

    fn handle_client(&mut self, player: PlayerHandle, request: ClientRequest) {
        let user = player.id;
        let strategies = &self.strategies;
        let sessions_opened = &mut self.sessions_opened;
        let entry = self.sessions.entry(user).or_insert_with(|| {
            *sessions_opened += 1;
            info!("Opened session {} for {}", sessions_opened, user);
            SessionEntry {
                session: GameSession::new(strategies()),
                generation: *sessions_opened,
                player: None,
            }
        });
        // Pushes follow the user's latest connection
        entry.player = Some(player);

        match request {
            ClientRequest::JoinGame => {
                entry.push(ClientResponse::GameJoined(entry.session.snapshot()));
            }
            ClientRequest::Choose { choice } => match entry.session.begin_round(choice) {
                None => entry.push(ClientResponse::ChoiceIgnored),
                Some(outcome) => {
                    entry.push(ClientResponse::RoundStarted {
                        player_choice: choice,
                    });
                    let generation = entry.generation;
                    self.schedule_reveal(user, generation, outcome);
                }
            },
            ClientRequest::Reset => {
                entry.session.reset();
                entry.push(ClientResponse::GameReset(entry.session.snapshot()));
            }
            ClientRequest::GetState => {
                entry.push(ClientResponse::State(entry.session.snapshot()));
            }
        }
    }

    fn schedule_reveal(&self, user: Id, generation: u64, outcome: RoundOutcome) {
        let to_self = self.to_self.clone();
        let RevealTiming {
            reveal_delay,
            input_cooldown,
        } = self.timing;
        tokio::spawn(async move {
            let round = outcome.round;
            tokio::time::sleep(reveal_delay).await;
            if to_self
                .send(SessionRequest::Reveal {
                    user,
                    generation,
                    outcome,
                })
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(input_cooldown).await;
            if to_self
                .send(SessionRequest::Release {
                    user,
                    generation,
                    round,
                })
                .await
                .is_err()
            {
                debug!("Manager stopped before releasing round {}", round);
            }
        });
    }

    // REST API

    pub fn router(to_manager: Sender<SessionRequest>) -> Router {
        Router::new()
            .route("/", get(Self::root))
            .route("/session/{user_id}", get(Self::get_session))
            .route("/session/{user_id}/reset", post(Self::reset_session))
            .layer(TraceLayer::new_for_http())
            .with_state(to_manager)
    }

    pub async fn rest_endpoint_thread(
        listener: TcpListener,
        mut shutdown_receiver: broadcast::Receiver<()>,
        to_manager: Sender<SessionRequest>,
    ) -> Result<()> {
        info!("REST api listening on {}", listener.local_addr()?);
        axum::serve(listener, Self::router(to_manager))
            .with_graceful_shutdown(async move {
                if shutdown_receiver.recv().await.is_err() {
                    warn!("Shutdown channel closed");
                }
            })
            .await?;
        info!("Exited REST api");
        Ok(())
    }

    async fn root() -> &'static str {
        "Rock, Paper, Scissors!"
    }

    async fn get_session(
        State(to_manager): State<Sender<SessionRequest>>,
        Path(user): Path<Id>,
    ) -> Response {
        Self::query(&to_manager, |reply| SessionRequest::Snapshot { user, reply }).await
    }

    async fn reset_session(
        State(to_manager): State<Sender<SessionRequest>>,
        Path(user): Path<Id>,
    ) -> Response {
        Self::query(&to_manager, |reply| SessionRequest::ResetSession { user, reply }).await
    }

    async fn query(
        to_manager: &mpsc::Sender<SessionRequest>,
        request: impl FnOnce(oneshot::Sender<Option<SessionSnapshot>>) -> SessionRequest,
    ) -> Response {
        let (reply, response) = oneshot::channel();
        if to_manager.send(request(reply)).await.is_err() {
            return (StatusCode::SERVICE_UNAVAILABLE, "game manager stopped").into_response();
        }
        match response.await {
            Ok(Some(snapshot)) => (StatusCode::OK, Json(snapshot)).into_response(),
            Ok(None) => (StatusCode::NOT_FOUND, "no such session").into_response(),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "game manager stopped").into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent::strategy::Strategy;
    use common::model::game::{Choice, Outcome, ScoreBoard};

    use super::*;

    struct Always(Choice);
    impl Strategy for Always {
        fn make_move(&mut self) -> Choice {
            self.0
        }
    }

    struct Harness {
        manager: GameManager,
        requests: Receiver<SessionRequest>,
        player: PlayerHandle,
        pushes: Receiver<ClientResponse>,
    }

    fn harness(opponent: Choice) -> Harness {
        let (to_self, requests) = mpsc::channel(16);
        let (sender, pushes) = mpsc::channel(16);
        let timing = RevealTiming {
            reveal_delay: Duration::ZERO,
            input_cooldown: Duration::ZERO,
        };
        let strategies: StrategyFactory =
            Arc::new(move || Box::new(Always(opponent)) as Box<dyn Strategy>);
        Harness {
            manager: GameManager::new(timing, strategies, to_self),
            requests,
            player: PlayerHandle {
                id: Id::new(),
                sender,
            },
            pushes,
        }
    }

    impl Harness {
        fn client(&mut self, request: ClientRequest) {
            self.manager.handle(SessionRequest::Client {
                player: self.player.clone(),
                request,
            });
        }

        // Feed the next self-scheduled request back in
        async fn tick(&mut self) {
            let request = self.requests.recv().await.expect("Nothing scheduled");
            self.manager.handle(request);
        }

        fn next_push(&mut self) -> ClientResponse {
            self.pushes.try_recv().expect("Expected a pushed response")
        }
    }

    #[tokio::test]
    async fn full_round_is_revealed_then_released() {
        let mut h = harness(Choice::Scissors);
        h.client(ClientRequest::JoinGame);
        assert_eq!(
            h.next_push(),
            ClientResponse::GameJoined(SessionSnapshot::default())
        );

        h.client(ClientRequest::Choose {
            choice: Choice::Rock,
        });
        assert_eq!(
            h.next_push(),
            ClientResponse::RoundStarted {
                player_choice: Choice::Rock
            }
        );

        h.tick().await;
        let ClientResponse::RoundResult(result) = h.next_push() else {
            panic!("Expected a round result");
        };
        assert_eq!(result.record.outcome, Outcome::Win);
        assert_eq!(result.message, "You Win! Rock beats Scissors");
        assert_eq!(
            result.score,
            ScoreBoard {
                wins: 1,
                losses: 0,
                ties: 0
            }
        );

        h.tick().await;
        assert_eq!(h.next_push(), ClientResponse::AwaitingChoice);
    }

    #[tokio::test]
    async fn choice_during_reveal_is_ignored() {
        let mut h = harness(Choice::Paper);
        h.client(ClientRequest::Choose {
            choice: Choice::Rock,
        });
        h.next_push();
        h.client(ClientRequest::Choose {
            choice: Choice::Scissors,
        });
        assert_eq!(h.next_push(), ClientResponse::ChoiceIgnored);

        h.client(ClientRequest::GetState);
        let ClientResponse::State(snapshot) = h.next_push() else {
            panic!("Expected state");
        };
        assert!(snapshot.round_in_progress);
        assert_eq!(snapshot.score.rounds_played(), 1);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test]
    async fn reset_mid_round_drops_pending_reveal() {
        let mut h = harness(Choice::Paper);
        h.client(ClientRequest::Choose {
            choice: Choice::Rock,
        });
        h.next_push();
        h.client(ClientRequest::Reset);
        assert_eq!(
            h.next_push(),
            ClientResponse::GameReset(SessionSnapshot::default())
        );

        // Both the reveal and the release are stale now
        h.tick().await;
        h.tick().await;
        assert!(h.pushes.try_recv().is_err());

        h.client(ClientRequest::Choose {
            choice: Choice::Scissors,
        });
        assert_eq!(
            h.next_push(),
            ClientResponse::RoundStarted {
                player_choice: Choice::Scissors
            }
        );
    }

    #[tokio::test]
    async fn snapshot_and_reset_requests() {
        let mut h = harness(Choice::Rock);
        let (reply, response) = oneshot::channel();
        h.manager.handle(SessionRequest::Snapshot {
            user: h.player.id,
            reply,
        });
        assert_eq!(response.await.unwrap(), None);

        h.client(ClientRequest::Choose {
            choice: Choice::Rock,
        });
        h.next_push();
        h.tick().await;
        h.tick().await;
        h.next_push();
        h.next_push();

        let (reply, response) = oneshot::channel();
        h.manager.handle(SessionRequest::Snapshot {
            user: h.player.id,
            reply,
        });
        let snapshot = response.await.unwrap().unwrap();
        assert_eq!(snapshot.score.ties, 1);
        assert!(!snapshot.round_in_progress);

        let (reply, response) = oneshot::channel();
        h.manager.handle(SessionRequest::ResetSession {
            user: h.player.id,
            reply,
        });
        assert_eq!(response.await.unwrap(), Some(SessionSnapshot::default()));
        assert_eq!(
            h.next_push(),
            ClientResponse::GameReset(SessionSnapshot::default())
        );
    }

    #[tokio::test]
    async fn timers_of_a_dropped_session_do_not_reach_its_successor() {
        let (to_self, mut requests) = mpsc::channel(16);
        let (sender, mut pushes) = mpsc::channel(16);
        let timing = RevealTiming {
            reveal_delay: Duration::ZERO,
            input_cooldown: Duration::ZERO,
        };
        // First session faces Scissors, the one after it faces Rock
        let opened = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let strategies: StrategyFactory = Arc::new(move || {
            let n = opened.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let opponent = if n == 0 { Choice::Scissors } else { Choice::Rock };
            Box::new(Always(opponent)) as Box<dyn Strategy>
        });
        let mut manager = GameManager::new(timing, strategies, to_self);
        let player = PlayerHandle {
            id: Id::new(),
            sender,
        };
        let choose = |choice| SessionRequest::Client {
            player: player.clone(),
            request: ClientRequest::Choose { choice },
        };

        manager.handle(choose(Choice::Rock));
        manager.handle(SessionRequest::Disconnect { user: player.id });
        manager.handle(choose(Choice::Paper));
        assert_eq!(
            pushes.try_recv().unwrap(),
            ClientResponse::RoundStarted {
                player_choice: Choice::Rock
            }
        );
        assert_eq!(
            pushes.try_recv().unwrap(),
            ClientResponse::RoundStarted {
                player_choice: Choice::Paper
            }
        );

        // Timers of both sessions are queued; only the current round may surface
        let mut revealed = Vec::new();
        let mut released = 0;
        while manager.sessions[&player.id].session.is_round_in_progress() {
            let request = requests.recv().await.expect("Nothing scheduled");
            let stale_release =
                matches!(request, SessionRequest::Release { generation: 1, .. });
            manager.handle(request);
            if stale_release {
                assert!(manager.sessions[&player.id].session.is_round_in_progress());
            }
            while let Ok(push) = pushes.try_recv() {
                match push {
                    ClientResponse::RoundResult(result) => revealed.push(result.record),
                    ClientResponse::AwaitingChoice => released += 1,
                    other => panic!("Unexpected push {:?}", other),
                }
            }
        }
        assert_eq!(revealed.len(), 1);
        assert_eq!(revealed[0].player_choice, Choice::Paper);
        assert_eq!(revealed[0].opponent_choice, Choice::Rock);
        assert_eq!(released, 1);
        let snapshot = manager.sessions[&player.id].session.snapshot();
        assert_eq!(snapshot.score.wins, 1);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test]
    async fn disconnect_drops_the_session() {
        let mut h = harness(Choice::Rock);
        h.client(ClientRequest::JoinGame);
        h.manager.handle(SessionRequest::Disconnect { user: h.player.id });
        assert!(h.manager.sessions.is_empty());
    }
}
