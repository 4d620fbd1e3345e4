use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use common::model::game::Choice;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::debug;

/// Picks the automated opponent's choice for each round.
pub trait Strategy: Send {
    fn make_move(&mut self) -> Choice;
}

/// Builds one independent strategy per game session.
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

// Uniform over the three choices, no memory of past rounds
pub struct RandomMove {
    rng: SmallRng,
}

impl RandomMove {
    pub fn new() -> Self {
        RandomMove {
            rng: SmallRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        RandomMove {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Factory for fresh random opponents. With a seed, the n-th session
    /// created draws from `seed + n`, so a whole run is reproducible.
    pub fn factory(seed: Option<u64>) -> StrategyFactory {
        let Some(seed) = seed else {
            let factory: StrategyFactory =
                Arc::new(|| Box::new(RandomMove::new()) as Box<dyn Strategy>);
            return factory;
        };
        let sessions = AtomicU64::new(0);
        let factory: StrategyFactory = Arc::new(move || {
            let n = sessions.fetch_add(1, Ordering::Relaxed);
            debug!("Seeding opponent #{} from {}", n, seed);
            Box::new(RandomMove::seeded(seed.wrapping_add(n))) as Box<dyn Strategy>
        });
        factory
    }
}

impl Default for RandomMove {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RandomMove {
    fn make_move(&mut self) -> Choice {
        Choice::ALL[self.rng.random_range(0..Choice::ALL.len())]
    }
}
