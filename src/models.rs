use crate::config::SimConfig;
use crate::knn::{MetricsModel, MetricsOutcome, StateFeatures};
use crate::state::{GameState, Side};

/// What the EP/WP models may consult at decision time.
#[derive(Debug, Clone, Copy)]
pub struct Models<'a> {
    pub metrics: Option<&'a MetricsModel>,
    pub config: &'a SimConfig,
}

impl<'a> Models<'a> {
    pub fn closed_form(config: &'a SimConfig) -> Self {
        Self {
            metrics: None,
            config,
        }
    }

    pub fn new(metrics: Option<&'a MetricsModel>, config: &'a SimConfig) -> Self {
        Self { metrics, config }
    }

    /// Estimator output for the current snap, if the estimator is available.
    pub fn estimate(&self, state: &GameState) -> Option<MetricsOutcome> {
        let model = self.metrics?;
        Some(model.estimate(&snap_features(state), self.config.knn_k))
    }
}

/// Features of the current snap from the possessing team's side.
pub fn snap_features(state: &GameState) -> StateFeatures {
    let s = &state.situation;
    StateFeatures {
        quarter: s.quarter as f64,
        down: s.down as f64,
        distance: s.distance as f64,
        yardline_100: s.yards_to_goal() as f64,
        seconds_remaining: s.game_seconds_remaining() as f64,
        score_differential: state.score.margin_for(s.possession) as f64,
        possession_is_home: if s.possession == Side::Home { 1.0 } else { 0.0 },
    }
}
