use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};

/// Number of rounds kept in a [`HistoryLog`].
pub const HISTORY_CAPACITY: usize = 5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Win,
    Lose,
    Tie,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    /// The choice this one defeats.
    pub fn beats(&self) -> Choice {
        match self {
            Choice::Rock => Choice::Scissors,
            Choice::Paper => Choice::Rock,
            Choice::Scissors => Choice::Paper,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Choice::Rock => "Rock",
            Choice::Paper => "Paper",
            Choice::Scissors => "Scissors",
        };
        f.write_str(name)
    }
}

/// Resolve a round from the player's point of view.
pub fn resolve(player: Choice, opponent: Choice) -> Outcome {
    if player == opponent {
        Outcome::Tie
    } else if player.beats() == opponent {
        Outcome::Win
    } else {
        Outcome::Lose
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRecord {
    pub player_choice: Choice,
    pub opponent_choice: Choice,
    pub outcome: Outcome,
}

impl RoundRecord {
    pub fn new(player_choice: Choice, opponent_choice: Choice) -> Self {
        RoundRecord {
            player_choice,
            opponent_choice,
            outcome: resolve(player_choice, opponent_choice),
        }
    }
}

// Result line shown to the player
impl fmt::Display for RoundRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Outcome::Win => write!(
                f,
                "You Win! {} beats {}",
                self.player_choice, self.opponent_choice
            ),
            Outcome::Lose => write!(
                f,
                "Computer Wins! {} beats {}",
                self.opponent_choice, self.player_choice
            ),
            Outcome::Tie => write!(f, "It's a Tie! Both chose {}", self.player_choice),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreBoard {
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
}

impl ScoreBoard {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Lose => self.losses += 1,
            Outcome::Tie => self.ties += 1,
        }
    }

    pub fn rounds_played(&self) -> u32 {
        self.wins + self.losses + self.ties
    }
}

/// Most recent rounds, newest first.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct HistoryLog(VecDeque<RoundRecord>);

impl HistoryLog {
    pub fn new() -> Self {
        HistoryLog(VecDeque::with_capacity(HISTORY_CAPACITY + 1))
    }

    pub fn push(&mut self, record: RoundRecord) {
        self.0.push_front(record);
        self.0.truncate(HISTORY_CAPACITY);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoundRecord> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
