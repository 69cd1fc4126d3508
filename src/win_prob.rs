use crate::clock::kneel_budget;
use crate::expected_points::expected_points;
use crate::knn::StateFeatures;
use crate::models::Models;
use crate::state::{GAME_SECONDS, GameState, Side};

pub const WP_MIN: f64 = 0.0001;
pub const WP_MAX: f64 = 0.9999;

const ESTIMATOR_WEIGHT: f64 = 0.70;

const LATE_WINDOW_SECS: f64 = 300.0;
const FAST_PACE_WINDOW_SECS: f64 = 240.0;
const SECS_PER_POSSESSION: f64 = 330.0;
const SECS_PER_POSSESSION_LATE: f64 = 150.0;
const TIMEOUT_CREDIT_SECS: f64 = 40.0;
const POINTS_PER_SCORE: f64 = 8.0;
const BUDGET_LOCK_POWER: f64 = 0.75;
const BUDGET_TARGET: f64 = 0.995;

const KNEEL_TARGET: f64 = 0.999;

const TWO_SCORE_MARGIN: i32 = 14;
const TWO_SCORE_SECS: f64 = 121.0;
const TWO_SCORE_LOCK_POWER: f64 = 0.35;
const TWO_SCORE_TARGET: f64 = 0.99;

const FLOOR_MARGIN: i32 = 25;
const FLOOR_SECS: u32 = 30;
const FLOOR_TARGET: f64 = 0.9995;

/// Inputs to the home win probability, all from the home team's frame
/// except `yardline`, which belongs to whoever has the ball.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WpInput {
    pub home_score: u32,
    pub away_score: u32,
    pub quarter: u8,
    pub clock_seconds: u32,
    pub down: u8,
    pub distance: i32,
    pub yardline: i32,
    pub possession: Side,
    pub home_timeouts: u8,
    pub away_timeouts: u8,
    /// Pre-game home win probability.
    pub prior: f64,
}

impl WpInput {
    pub fn from_state(state: &GameState, prior: f64) -> Self {
        let s = &state.situation;
        Self {
            home_score: state.score.home,
            away_score: state.score.away,
            quarter: s.quarter,
            clock_seconds: s.clock_seconds,
            down: s.down,
            distance: s.distance,
            yardline: s.yardline,
            possession: s.possession,
            home_timeouts: state.timeouts.home,
            away_timeouts: state.timeouts.away,
            prior,
        }
    }

    pub fn margin(&self) -> i32 {
        self.home_score as i32 - self.away_score as i32
    }

    pub fn seconds_left(&self) -> u32 {
        let later = 4u32.saturating_sub(self.quarter as u32);
        later * 900 + self.clock_seconds.min(900)
    }

    fn timeouts(&self, side: Side) -> u8 {
        match side {
            Side::Home => self.home_timeouts,
            Side::Away => self.away_timeouts,
        }
    }

    fn features(&self) -> StateFeatures {
        let poss_margin = match self.possession {
            Side::Home => self.margin(),
            Side::Away => -self.margin(),
        };
        StateFeatures {
            quarter: self.quarter as f64,
            down: self.down as f64,
            distance: self.distance as f64,
            yardline_100: (100 - self.yardline) as f64,
            seconds_remaining: self.seconds_left() as f64,
            score_differential: poss_margin as f64,
            possession_is_home: if self.possession == Side::Home { 1.0 } else { 0.0 },
        }
    }
}

/// Elapsed share of regulation, in `[0, 1]`.
pub fn time_fraction(quarter: u8, clock_seconds: u32) -> f64 {
    let later = 4u32.saturating_sub(quarter as u32);
    let left = (later * 900 + clock_seconds.min(900)) as f64;
    (1.0 - left / GAME_SECONDS as f64).clamp(0.0, 1.0)
}

/// Largest WPA a single play may book at this point of the game.
pub fn wp_cap(quarter: u8, clock_seconds: u32) -> f64 {
    0.03 + 0.70 * time_fraction(quarter, clock_seconds).powf(2.25)
}

pub fn win_probability_for_state(state: &GameState, prior: f64, models: &Models) -> f64 {
    win_probability(&WpInput::from_state(state, prior), models)
}

/// Home win probability in `[WP_MIN, WP_MAX]`.
pub fn win_probability(input: &WpInput, models: &Models) -> f64 {
    let margin = input.margin();
    let secs = input.seconds_left();
    let tf = time_fraction(input.quarter, input.clock_seconds);

    let mut wp = clamp_wp(closed_form(input, tf));

    if let Some(model) = models.metrics {
        let est = model.estimate(&input.features(), models.config.knn_k);
        let est_home = match input.possession {
            Side::Home => est.win_prob,
            Side::Away => 1.0 - est.win_prob,
        };
        wp = clamp_wp(ESTIMATOR_WEIGHT * est_home + (1.0 - ESTIMATOR_WEIGHT) * wp);
    }

    if margin == 0 {
        return wp;
    }
    let leader = if margin > 0 { Side::Home } else { Side::Away };
    let trailer = leader.other();
    let lead = margin.unsigned_abs() as i32;

    // Not enough possessions left for the trailing side.
    let scores_needed = (lead as f64 / POINTS_PER_SCORE).ceil() as u32;
    let available = possessions_available(
        input.possession == trailer,
        secs,
        input.timeouts(trailer),
    );
    if scores_needed > available && (secs as f64) < LATE_WINDOW_SECS {
        let elapsed = (LATE_WINDOW_SECS - secs as f64) / LATE_WINDOW_SECS;
        let lock = elapsed.powf(BUDGET_LOCK_POWER);
        wp = clamp_wp(pull(wp, leader, BUDGET_TARGET, lock));
    }

    // Leader has the ball and can kneel it out.
    if input.possession == leader {
        let budget = kneel_budget(input.down, input.timeouts(trailer));
        if budget > 0 && secs as i32 <= budget {
            let used = 1.0 - secs as f64 / budget as f64;
            let lock = 0.85 + 0.15 * used;
            wp = clamp_wp(pull(wp, leader, KNEEL_TARGET, lock));
        }
    }

    if lead >= TWO_SCORE_MARGIN && (secs as f64) <= TWO_SCORE_SECS {
        let lock = ((TWO_SCORE_SECS - secs as f64) / TWO_SCORE_SECS).powf(TWO_SCORE_LOCK_POWER);
        wp = clamp_wp(pull(wp, leader, TWO_SCORE_TARGET, lock));
    }

    if lead >= FLOOR_MARGIN && secs <= FLOOR_SECS {
        wp = match leader {
            Side::Home => wp.max(FLOOR_TARGET),
            Side::Away => wp.min(1.0 - FLOOR_TARGET),
        };
    }

    clamp_wp(wp)
}

fn closed_form(input: &WpInput, tf: f64) -> f64 {
    let prior = input.prior.clamp(0.02, 0.98);
    let prior_logit = (prior / (1.0 - prior)).ln() * (1.0 - tf);

    let margin_coef = 0.10 + 0.40 * tf.powf(2.5);
    let margin_term = input.margin() as f64 * margin_coef;

    let sign = match input.possession {
        Side::Home => 1.0,
        Side::Away => -1.0,
    };
    let field_term = sign * (input.yardline as f64 - 50.0) / 50.0 * 0.15 * (0.5 + tf);
    let ep = expected_points(input.down, input.distance as f64, input.yardline as f64);
    let ep_nudge = sign * ep * margin_coef * 0.35;

    logistic(prior_logit + margin_term + field_term + ep_nudge)
}

/// Possessions the trailing side can still expect, counting the current one.
fn possessions_available(trailer_has_ball: bool, secs: u32, trailer_timeouts: u8) -> u32 {
    let effective = secs as f64 + TIMEOUT_CREDIT_SECS * trailer_timeouts as f64;
    let cycle = if (secs as f64) <= FAST_PACE_WINDOW_SECS {
        SECS_PER_POSSESSION_LATE
    } else {
        SECS_PER_POSSESSION
    };
    let later = (effective / cycle).floor() as u32;
    if trailer_has_ball { 1 + later } else { later }
}

/// Moves `wp` part of the way toward the leader's target, never away from it.
fn pull(wp: f64, leader: Side, target: f64, lock: f64) -> f64 {
    let lock = lock.clamp(0.0, 1.0);
    match leader {
        Side::Home if wp < target => wp + (target - wp) * lock,
        Side::Away if wp > 1.0 - target => wp - (wp - (1.0 - target)) * lock,
        _ => wp,
    }
}

fn clamp_wp(wp: f64) -> f64 {
    if wp.is_nan() {
        return 0.5;
    }
    wp.clamp(WP_MIN, WP_MAX)
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
