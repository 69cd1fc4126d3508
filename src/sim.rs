//! A single game: owned state, both teams, a seeded RNG and the estimator
//! snapshot taken at kickoff.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::knn::{MetricsHandle, MetricsModel};
use crate::models::Models;
use crate::play::{self, TickContext, TickOutcome};
use crate::prior::{PriorConfig, pregame_home_wp};
use crate::ratings::{Matchup, TeamRatings};
use crate::state::{Drive, GameState, PlayEvent, Side};
use crate::win_prob::win_probability_for_state;

/// Upper bound on ticks in one game; a healthy game needs a few hundred.
pub const MAX_TICKS: u64 = 5_000;

pub struct Simulation {
    state: GameState,
    home: TeamRatings,
    away: TeamRatings,
    config: SimConfig,
    metrics: Option<Arc<MetricsModel>>,
    rng: ChaCha8Rng,
    seed: u64,
    prior: f64,
}

impl Simulation {
    /// Validates both rosters and sets up the opening kickoff. The estimator
    /// is used only if `metrics` is already loaded.
    pub fn new(
        home: TeamRatings,
        away: TeamRatings,
        config: SimConfig,
        metrics: &MetricsHandle,
    ) -> SimResult<Self> {
        Self::with_model(home, away, config, metrics.snapshot())
    }

    pub fn with_model(
        home: TeamRatings,
        away: TeamRatings,
        mut config: SimConfig,
        metrics: Option<Arc<MetricsModel>>,
    ) -> SimResult<Self> {
        home.validate()?;
        away.validate()?;
        config.sanitize();
        let seed = config.seed.unwrap_or_else(rand::random);
        let prior = pregame_home_wp(&home, &away, PriorConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let state = opening_state(&mut rng, &home, &away);
        tracing::debug!(
            home = %home.abbr,
            away = %away.abbr,
            seed,
            prior,
            estimator = metrics.is_some(),
            "new game"
        );
        Ok(Self {
            state,
            home,
            away,
            config,
            metrics,
            rng,
            seed,
            prior,
        })
    }

    /// Resolves exactly one tick. A finished game stays finished.
    pub fn tick(&mut self) -> SimResult<TickOutcome> {
        let Self {
            state,
            home,
            away,
            config,
            metrics,
            rng,
            prior,
            ..
        } = self;
        let ctx = TickContext {
            matchup: Matchup::new(home, away),
            models: Models::new(metrics.as_deref(), config),
            prior: *prior,
        };
        play::tick(state, &ctx, rng)
    }

    pub fn run_to_completion(&mut self) -> SimResult<()> {
        while !self.state.is_final() {
            if self.state.ticks >= MAX_TICKS {
                return Err(SimError::invariant(format!(
                    "game still live after {MAX_TICKS} ticks"
                )));
            }
            self.tick()?;
        }
        Ok(())
    }

    /// Starts the same matchup over from the opening kickoff with the same seed.
    pub fn reset(&mut self) {
        self.reset_with_seed(self.seed);
    }

    pub fn reset_with_seed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.state = opening_state(&mut self.rng, &self.home, &self.away);
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn events(&self) -> &[PlayEvent] {
        &self.state.events
    }

    pub fn drives(&self) -> &[Drive] {
        &self.state.drives
    }

    pub fn home(&self) -> &TeamRatings {
        &self.home
    }

    pub fn away(&self) -> &TeamRatings {
        &self.away
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn prior(&self) -> f64 {
        self.prior
    }

    pub fn uses_estimator(&self) -> bool {
        self.metrics.is_some()
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    pub fn home_win_probability(&self) -> f64 {
        let models = Models::new(self.metrics.as_deref(), &self.config);
        win_probability_for_state(&self.state, self.prior, &models)
    }
}

fn opening_state(rng: &mut ChaCha8Rng, home: &TeamRatings, away: &TeamRatings) -> GameState {
    let receiver = if rng.gen_bool(0.5) { Side::Home } else { Side::Away };
    GameState::new(receiver, home.roster.len(), away.roster.len())
}
