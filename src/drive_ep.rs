//! Pre-snap value of the current drive, including the eventual 4th-down call.

use crate::config::{SimConfig, Weather};
use crate::expected_points::{EP_MAX, expected_points};
use crate::models::Models;
use crate::ratings::{Matchup, Position, TeamRatings};
use crate::state::{GameState, Situation};

pub const TOUCHDOWN_POINTS: f64 = 6.0;
pub const FIELD_GOAL_POINTS: f64 = 3.0;
/// Snap-plus-hold yards added to the line of scrimmage on a kick.
pub const FG_SNAP_YARDS: i32 = 17;

// (a, b) for P(convert) = 1 / (1 + exp(a + b * distance)), downs 1-4.
const CONVERSION_COEFFS: [(f64, f64); 4] = [
    (-2.047, 0.12),
    (-1.399, 0.16),
    (-0.901, 0.20),
    (-1.0084, 0.3451),
];

const THIRD_AND_LONG_DISCOUNT: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourthDownCall {
    GoForIt,
    FieldGoal,
    Punt,
}

/// Chance of moving the chains on this down from `distance` yards.
pub fn conversion_probability(down: u8, distance: f64) -> f64 {
    let (a, b) = CONVERSION_COEFFS[(down.clamp(1, 4) - 1) as usize];
    1.0 / (1.0 + (a + b * distance.max(0.0)).exp())
}

pub fn kick_distance(yardline: i32) -> i32 {
    (100 - yardline) + FG_SNAP_YARDS
}

pub fn kicker_skill(team: &TeamRatings) -> f64 {
    team.starter(Position::K)
        .map(|idx| team.player(idx).kicking)
        .unwrap_or(60.0)
}

/// Longest field goal the kicking team will attempt.
pub fn field_goal_range(team: &TeamRatings, weather: &Weather) -> f64 {
    let skill = 0.5 * kicker_skill(team) + 0.5 * team.special;
    (55.0 + (skill - 60.0) * 0.2 - weather.kicking_range_penalty()).clamp(40.0, 64.0)
}

pub fn field_goal_make_probability(distance: f64, kicker: f64, weather: &Weather) -> f64 {
    let x = 5.9 - 0.105 * distance + (kicker - 70.0) * 0.02;
    let p = 1.0 / (1.0 + (-x).exp());
    (p - weather.kicking_accuracy_penalty()).clamp(0.01, 0.99)
}

/// Yards below which the offense keeps its offense on the field on 4th down.
pub fn go_for_it_threshold(state: &GameState, config: &SimConfig) -> f64 {
    let s = &state.situation;
    let base = if s.yardline >= 90 {
        2.0
    } else if s.yardline >= 60 {
        3.0
    } else if s.yardline >= 40 {
        2.5
    } else {
        1.5
    };
    let mut threshold = base * config.aggressiveness;

    let deficit = -state.score.margin_for(s.possession);
    if s.quarter == 4 && deficit > 0 {
        if deficit > 3 && s.clock_seconds <= 240 {
            threshold += 4.0;
        } else if s.clock_seconds <= 600 {
            threshold += 2.0;
        }
    }
    threshold
}

/// Go, kick or punt on the current 4th down.
pub fn fourth_down_call(state: &GameState, matchup: &Matchup, config: &SimConfig) -> FourthDownCall {
    let s = &state.situation;
    let team = matchup.team(s.possession);
    let in_range = (kick_distance(s.yardline) as f64) <= field_goal_range(team, &config.weather);

    let deficit = -state.score.margin_for(s.possession);
    let last_chance = s.quarter == 4 && deficit > 0 && s.clock_seconds <= 120;
    if last_chance && !(deficit <= 3 && in_range) {
        return FourthDownCall::GoForIt;
    }

    if (s.distance as f64) < go_for_it_threshold(state, config) {
        FourthDownCall::GoForIt
    } else if in_range {
        FourthDownCall::FieldGoal
    } else {
        FourthDownCall::Punt
    }
}

/// Drive value for the possessing team, PAT excluded, in `[0, EP_MAX]`.
pub fn drive_ep(state: &GameState, matchup: &Matchup, models: &Models) -> f64 {
    if let Some(est) = models.estimate(state) {
        return est.expected_points.clamp(0.0, EP_MAX);
    }
    analytic_drive_ep(state, matchup, models.config)
}

pub fn analytic_drive_ep(state: &GameState, matchup: &Matchup, config: &SimConfig) -> f64 {
    let s = &state.situation;
    let value = if s.down >= 4 {
        fourth_down_value(state, matchup, config, s.distance)
    } else {
        let conv = conversion_probability(s.down, s.distance as f64);
        let fail = fourth_down_value(state, matchup, config, s.distance);
        let mut v = conv * success_value(s) + (1.0 - conv) * fail;
        let team = matchup.team(s.possession);
        let in_range =
            (kick_distance(s.yardline) as f64) <= field_goal_range(team, &config.weather);
        if s.down == 3 && s.distance >= 7 && in_range {
            v *= THIRD_AND_LONG_DISCOUNT;
        }
        v
    };
    value.clamp(0.0, EP_MAX)
}

/// `max(fg, go, punt = 0, 0)` facing 4th-and-`distance` at the current spot.
fn fourth_down_value(state: &GameState, matchup: &Matchup, config: &SimConfig, distance: i32) -> f64 {
    let s = &state.situation;
    let team = matchup.team(s.possession);

    let kick = kick_distance(s.yardline) as f64;
    let fg_ev = if kick <= field_goal_range(team, &config.weather) {
        FIELD_GOAL_POINTS * field_goal_make_probability(kick, kicker_skill(team), &config.weather)
    } else {
        0.0
    };

    let mut fourth = *s;
    fourth.down = 4;
    fourth.distance = distance;
    let go_ev = if (distance as f64) < go_for_it_threshold(&with_situation(state, fourth), config) {
        conversion_probability(4, distance as f64) * success_value(&fourth)
    } else {
        0.0
    };

    fg_ev.max(go_ev).max(0.0)
}

/// Value of moving the chains from `s`: a touchdown when goal-to-go, else
/// first down at the line to gain.
fn success_value(s: &Situation) -> f64 {
    let new_yardline = s.yardline + s.distance;
    if new_yardline >= 100 {
        return TOUCHDOWN_POINTS;
    }
    let to_goal = (100 - new_yardline) as f64;
    expected_points(1, to_goal.min(10.0), new_yardline as f64).max(0.0)
}

fn with_situation(state: &GameState, situation: Situation) -> GameState {
    let mut what_if = GameState::at(situation, state.score);
    what_if.timeouts = state.timeouts;
    what_if
}
