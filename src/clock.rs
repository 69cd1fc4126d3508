//! Game clock, timeouts and quarter/half transitions.

use crate::config::SimConfig;
use crate::state::{
    DriveResult, GamePhase, GameState, PendingAction, QUARTER_SECONDS, Side, Timeouts,
};

pub const TWO_MINUTE_MARK: u32 = 120;
/// Runoff a called timeout takes off the play.
pub const TIMEOUT_RUNOFF_SAVED_SECS: u32 = 10;
pub const KNEELS: i32 = 3;
pub const SECS_PER_KNEEL: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockContext {
    /// False when the play ended out of bounds, incomplete or in a score.
    pub in_bounds: bool,
    /// Live-ball time, which elapses whether or not the clock keeps running.
    pub play_seconds: u32,
}

impl ClockContext {
    pub fn running(play_seconds: u32) -> Self {
        Self {
            in_bounds: true,
            play_seconds,
        }
    }

    pub fn stopped(play_seconds: u32) -> Self {
        Self {
            in_bounds: false,
            play_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockReport {
    pub elapsed: u32,
    pub timeout: Option<Side>,
    pub two_minute_warning: bool,
    pub expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseChange {
    None,
    QuarterEnded(u8),
    Halftime,
    Final,
}

/// Runs the clock for one play.
pub fn apply_clock(
    state: &mut GameState,
    runoff_seconds: u32,
    ctx: ClockContext,
    config: &SimConfig,
) -> ClockReport {
    let mut report = ClockReport::default();
    let s = state.situation;
    let before = s.clock_seconds;
    let half = s.half_index();
    let warning_due = matches!(s.quarter, 2 | 4)
        && !state.two_minute_warning_given[half]
        && before > TWO_MINUTE_MARK;

    let mut elapsed = ctx.play_seconds;
    if ctx.in_bounds {
        let mut runoff = runoff_seconds;
        let crosses_warning =
            warning_due && before.saturating_sub(elapsed.saturating_add(runoff)) <= TWO_MINUTE_MARK;
        if !crosses_warning
            && let Some(side) = choose_timeout(state, config)
            && call_timeout(state, side, config.min_timeout_gap_secs)
        {
            runoff = runoff.saturating_sub(TIMEOUT_RUNOFF_SAVED_SECS);
            report.timeout = Some(side);
        }
        elapsed = elapsed.saturating_add(runoff);
    }

    let mut after = before.saturating_sub(elapsed);
    if warning_due && after <= TWO_MINUTE_MARK {
        after = TWO_MINUTE_MARK;
        state.two_minute_warning_given[half] = true;
        report.two_minute_warning = true;
    }

    state.situation.clock_seconds = after;
    report.elapsed = before - after;
    report.expired = after == 0;
    report
}

/// Spends a timeout for `side` unless its bank is empty or it called one
/// less than `min_gap_secs` of game clock ago. Returns whether it was taken.
pub fn call_timeout(state: &mut GameState, side: Side, min_gap_secs: u32) -> bool {
    if !timeout_allowed(state, side, min_gap_secs) {
        return false;
    }
    if !state.timeouts.spend(side) {
        return false;
    }
    state.last_timeout_at[side.index()] = Some(state.situation.game_seconds_remaining());
    tracing::debug!(side = side.label(), left = state.timeouts.get(side), "timeout");
    true
}

fn timeout_allowed(state: &GameState, side: Side, min_gap_secs: u32) -> bool {
    if state.timeouts.get(side) == 0 {
        return false;
    }
    let now = state.situation.game_seconds_remaining();
    match state.last_timeout_at[side.index()] {
        Some(last) => last.saturating_sub(now) >= min_gap_secs,
        None => true,
    }
}

/// Which side, if any, stops the clock after an in-bounds play. The defense
/// gets the first chance.
pub fn choose_timeout(state: &GameState, config: &SimConfig) -> Option<Side> {
    let s = &state.situation;
    if s.quarter != 4 {
        return None;
    }
    let gap = config.min_timeout_gap_secs;
    let offense = s.possession;
    let defense = offense.other();

    let defense_deficit = -state.score.margin_for(defense);
    if defense_deficit > 0
        && (s.clock_seconds <= 180 || (s.clock_seconds <= 300 && defense_deficit <= 8))
        && timeout_allowed(state, defense, gap)
    {
        return Some(defense);
    }

    let offense_deficit = -state.score.margin_for(offense);
    if offense_deficit > 0 && s.clock_seconds <= 150 && timeout_allowed(state, offense, gap) {
        return Some(offense);
    }
    None
}

/// Huddle-to-snap seconds the offense takes before its next play.
pub fn between_play_runoff(state: &GameState) -> u32 {
    let s = &state.situation;
    let margin = state.score.margin_for(s.possession);
    let late = (s.quarter == 4 && s.clock_seconds <= 300) || (s.quarter == 2 && s.clock_seconds <= 120);
    if late && margin < 0 {
        12
    } else if s.quarter == 4 && s.clock_seconds <= 300 && margin > 0 {
        38
    } else {
        28
    }
}

/// Seconds a leading offense can burn by kneeling against the given number
/// of defensive timeouts.
pub fn kneel_budget(down: u8, defensive_timeouts: u8) -> i32 {
    let kneels = KNEELS.min(5 - down.clamp(1, 4) as i32);
    kneels * SECS_PER_KNEEL - SECS_PER_KNEEL * defensive_timeouts as i32
}

/// True when the offense leads in the fourth quarter and can run out the clock.
pub fn can_kneel_out(state: &GameState) -> bool {
    let s = &state.situation;
    if s.quarter != 4 || state.score.margin_for(s.possession) <= 0 {
        return false;
    }
    let budget = kneel_budget(s.down, state.timeouts.get(s.possession.other()));
    budget > 0 && (s.clock_seconds as i32) <= budget
}

/// Moves to the next quarter once the clock reads zero.
pub fn advance_phase(state: &mut GameState) -> PhaseChange {
    if state.situation.clock_seconds > 0 || state.phase == GamePhase::Final {
        return PhaseChange::None;
    }
    match state.situation.quarter {
        q @ (1 | 3) => {
            state.situation.quarter = q + 1;
            state.situation.clock_seconds = QUARTER_SECONDS;
            PhaseChange::QuarterEnded(q)
        }
        2 => {
            state.close_drive(DriveResult::EndOfHalf, 0);
            state.situation.quarter = 3;
            state.situation.clock_seconds = QUARTER_SECONDS;
            state.timeouts = Timeouts::default();
            state.last_timeout_at = [None; 2];
            state.pending = PendingAction::Kickoff {
                kicking_side: state.opening_receiver,
                onside: false,
            };
            PhaseChange::Halftime
        }
        _ => {
            state.close_drive(DriveResult::EndOfGame, 0);
            state.pending = PendingAction::None;
            state.phase = GamePhase::Final;
            PhaseChange::Final
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Score, Situation};

    fn state_at(quarter: u8, clock: u32) -> GameState {
        GameState::at(
            Situation {
                quarter,
                clock_seconds: clock,
                down: 1,
                distance: 10,
                yardline: 40,
                possession: Side::Home,
            },
            Score::default(),
        )
    }

    #[test]
    fn out_of_bounds_stops_runoff() {
        let cfg = SimConfig::default();
        let mut state = state_at(1, 600);
        let report = apply_clock(&mut state, 35, ClockContext::stopped(6), &cfg);
        assert_eq!(state.situation.clock_seconds, 594);
        assert_eq!(report.elapsed, 6);
        assert_eq!(report.timeout, None);
    }

    #[test]
    fn trailing_defense_saves_time_late() {
        let cfg = SimConfig::default();
        let mut state = state_at(4, 170);
        state.score = Score { home: 17, away: 10 };
        let report = apply_clock(&mut state, 35, ClockContext::running(5), &cfg);
        assert_eq!(report.timeout, Some(Side::Away));
        assert_eq!(state.timeouts.away, 2);
        assert_eq!(report.elapsed, 5 + 35 - TIMEOUT_RUNOFF_SAVED_SECS);
        assert_eq!(state.situation.clock_seconds, 140);
    }

    #[test]
    fn warning_crossing_spends_no_timeout() {
        let cfg = SimConfig::default();
        let mut state = state_at(4, 140);
        state.score = Score { home: 17, away: 10 };
        let report = apply_clock(&mut state, 35, ClockContext::running(5), &cfg);
        assert!(report.two_minute_warning);
        assert_eq!(report.timeout, None);
        assert_eq!(state.situation.clock_seconds, TWO_MINUTE_MARK);
        assert_eq!(state.timeouts.away, 3);
    }

    #[test]
    fn halftime_schedules_kickoff_and_resets_timeouts() {
        let mut state = state_at(2, 0);
        state.opening_receiver = Side::Away;
        state.timeouts.home = 0;
        state.start_drive(1.0);
        assert_eq!(advance_phase(&mut state), PhaseChange::Halftime);
        assert_eq!(state.situation.quarter, 3);
        assert_eq!(state.timeouts.home, 3);
        assert_eq!(
            state.pending,
            PendingAction::Kickoff {
                kicking_side: Side::Away,
                onside: false
            }
        );
        assert_eq!(state.drives[0].result, Some(DriveResult::EndOfHalf));
    }

    #[test]
    fn fourth_quarter_expiry_is_final() {
        let mut state = state_at(4, 0);
        assert_eq!(advance_phase(&mut state), PhaseChange::Final);
        assert!(state.is_final());
        assert_eq!(advance_phase(&mut state), PhaseChange::None);
    }

    #[test]
    fn kneel_budget_shrinks_with_timeouts() {
        assert_eq!(kneel_budget(1, 0), 120);
        assert_eq!(kneel_budget(1, 2), 40);
        assert_eq!(kneel_budget(3, 0), 80);
        assert!(kneel_budget(1, 3) <= 0);
    }
}
