use crate::ratings::TeamRatings;

#[derive(Debug, Clone, Copy)]
pub struct PriorConfig {
    /// Elo points per rating point of team power.
    pub elo_per_power: f64,
    pub home_adv_pts: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            elo_per_power: 12.0,
            home_adv_pts: 48.0,
        }
    }
}

/// Pre-game home win probability from the two rating aggregates.
pub fn pregame_home_wp(home: &TeamRatings, away: &TeamRatings, cfg: PriorConfig) -> f64 {
    let r_home = 1500.0 + cfg.elo_per_power * (home.power() - 60.0);
    let r_away = 1500.0 + cfg.elo_per_power * (away.power() - 60.0);
    expected_score(r_home + cfg.home_adv_pts, r_away).clamp(0.02, 0.98)
}

fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}
