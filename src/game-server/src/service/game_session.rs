use agent::strategy::Strategy;
use common::model::game::{Choice, HistoryLog, RoundRecord, ScoreBoard};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything the presentation layer needs after a round.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub round: u64,
    pub record: RoundRecord,
    pub score: ScoreBoard,
    pub history: HistoryLog,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub score: ScoreBoard,
    pub history: HistoryLog,
    pub round_in_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Idle,
    RoundInProgress { round: u64 },
}

/// One player's game against the automated opponent.
pub struct GameSession {
    opponent: Box<dyn Strategy>,
    phase: SessionPhase,
    score: ScoreBoard,
    history: HistoryLog,
    // Rounds started over the session's lifetime, never reset
    rounds_started: u64,
}

impl GameSession {
    pub fn new(opponent: Box<dyn Strategy>) -> Self {
        GameSession {
            opponent,
            phase: SessionPhase::Idle,
            score: ScoreBoard::default(),
            history: HistoryLog::new(),
            rounds_started: 0,
        }
    }

    /// Play a full round. Returns `None` if a round is still in progress.
    pub fn submit_choice(&mut self, choice: Choice) -> Option<RoundOutcome> {
        let outcome = self.begin_round(choice)?;
        self.finish_round(outcome.round);
        Some(outcome)
    }

    /// Resolve a round and keep the session locked until
    /// [`finish_round`](Self::finish_round) is called with its number.
    pub fn begin_round(&mut self, choice: Choice) -> Option<RoundOutcome> {
        if let SessionPhase::RoundInProgress { round } = self.phase {
            debug!("Ignoring {:?}, round {} still in progress", choice, round);
            return None;
        }

        self.rounds_started += 1;
        let round = self.rounds_started;
        self.phase = SessionPhase::RoundInProgress { round };

        let record = RoundRecord::new(choice, self.opponent.make_move());
        self.score.record(record.outcome);
        self.history.push(record);
        debug!("Round {}: {:?}", round, record);

        Some(RoundOutcome {
            round,
            record,
            score: self.score,
            history: self.history.clone(),
        })
    }

    /// Unlock the session if `round` is the one in progress.
    pub fn finish_round(&mut self, round: u64) -> bool {
        match self.phase {
            SessionPhase::RoundInProgress { round: current } if current == round => {
                self.phase = SessionPhase::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.score = ScoreBoard::default();
        self.history.clear();
        self.phase = SessionPhase::Idle;
    }

    pub fn current_score(&self) -> ScoreBoard {
        self.score
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn is_round_in_progress(&self) -> bool {
        matches!(self.phase, SessionPhase::RoundInProgress { .. })
    }

    /// Number of the round currently holding the session, if any.
    pub fn round_in_progress(&self) -> Option<u64> {
        match self.phase {
            SessionPhase::RoundInProgress { round } => Some(round),
            SessionPhase::Idle => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            score: self.score,
            history: self.history.clone(),
            round_in_progress: self.is_round_in_progress(),
        }
    }
}
