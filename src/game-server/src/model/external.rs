use common::model::game::{Choice, HistoryLog, RoundRecord, ScoreBoard};
use serde::{Deserialize, Serialize};

use crate::service::game_session::{RoundOutcome, SessionSnapshot};

// Client types
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientRequest {
    JoinGame,
    Choose { choice: Choice },
    Reset,
    GetState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoundResultResponse {
    pub record: RoundRecord,
    pub message: String,
    pub score: ScoreBoard,
    pub history: HistoryLog,
}

impl From<RoundOutcome> for RoundResultResponse {
    fn from(outcome: RoundOutcome) -> Self {
        RoundResultResponse {
            message: outcome.record.to_string(),
            record: outcome.record,
            score: outcome.score,
            history: outcome.history,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientResponse {
    GameJoined(SessionSnapshot),
    // Player's choice is locked in, opponent not revealed yet
    RoundStarted { player_choice: Choice },
    ChoiceIgnored,
    RoundResult(RoundResultResponse),
    // Input window reopened after the reveal
    AwaitingChoice,
    GameReset(SessionSnapshot),
    State(SessionSnapshot),
    InvalidRequest { reason: String },
}
