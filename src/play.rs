//! One tick of play: phase changes, pending kicks, pre-snap flags and the
//! snap itself, with EPA/WPA booked on every resolved play.

use rand::Rng;
use rand::distributions::WeightedIndex;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::clock::{self, ClockContext, ClockReport, PhaseChange};
use crate::config::SimConfig;
use crate::drive_ep::{self, FIELD_GOAL_POINTS, FourthDownCall, TOUCHDOWN_POINTS};
use crate::error::SimResult;
use crate::models::Models;
use crate::ratings::{Matchup, PlayerRatings, Position, TeamRatings};
use crate::special_teams;
use crate::state::{
    DriveResult, GameState, PendingAction, PlayEvent, PlayTag, ScoreKind, ScoringPlay, Side,
    Situation,
};
use crate::win_prob::{win_probability_for_state, wp_cap};

const BASE_PASS_RATE: f64 = 0.54;
const MIN_PASS_RATE: f64 = 0.40;
const MAX_PASS_RATE: f64 = 0.65;
const FATIGUE_CARRIES: u32 = 22;
const FUMBLE_LOST_RATE: f64 = 0.01;
const PENALTY_YARDS: i32 = 5;
const SACK_GIVEN_PRESSURE: f64 = 0.35;
const KNEEL_PLAY_SECS: u32 = 2;
/// Yardline the offense snaps from on a conversion try.
pub const CONVERSION_YARDLINE: i32 = 98;

/// Everything a tick reads but never mutates.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub matchup: Matchup<'a>,
    pub models: Models<'a>,
    /// Pre-game home win probability.
    pub prior: f64,
}

impl TickContext<'_> {
    pub fn config(&self) -> &SimConfig {
        self.models.config
    }

    pub fn drive_ep(&self, state: &GameState) -> f64 {
        drive_ep::drive_ep(state, &self.matchup, &self.models)
    }

    pub fn home_wp(&self, state: &GameState) -> f64 {
        win_probability_for_state(state, self.prior, &self.models)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickOutcome {
    /// A play (or kick) was resolved.
    Advanced,
    /// A pre-snap flag; the down is replayed.
    Replay,
    QuarterEnded(u8),
    Halftime,
    Final,
}

/// What the offense runs on a live snap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayKind {
    Run,
    Pass,
    Kneel,
    FourthDownTry,
    FieldGoal,
    Punt,
}

/// Where the ball goes once a snap is over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Next {
    /// Same offense; down and distance follow from the yards gained.
    Continue,
    Touchdown,
    FieldGoal,
    /// The drive ends and the other side takes over at `yardline` (its frame).
    ChangeOfPossession { result: DriveResult, yardline: i32 },
}

#[derive(Debug, Clone)]
pub(crate) struct PlayOutcome {
    pub tag: PlayTag,
    pub description: String,
    pub yards: i32,
    pub clock: ClockContext,
    pub next: Next,
}

/// Pre-snap values the bookkeeping compares against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreSnap {
    pub situation: Situation,
    pub drive_ep: f64,
    pub home_wp: f64,
}

impl PreSnap {
    pub fn take(state: &GameState, ctx: &TickContext, drive_ep: f64) -> Self {
        Self {
            situation: state.situation,
            drive_ep,
            home_wp: ctx.home_wp(state),
        }
    }

    /// WPA capped by the time left at the snap.
    pub fn wpa(&self, home_wp: f64) -> f64 {
        let cap = wp_cap(self.situation.quarter, self.situation.clock_seconds);
        (home_wp - self.home_wp).clamp(-cap, cap)
    }

    pub fn event(&self, state: &GameState, tag: PlayTag, description: String) -> PlayEvent {
        let s = &self.situation;
        PlayEvent {
            tag,
            description,
            offense: s.possession,
            is_scoring: false,
            epa: 0.0,
            wpa: 0.0,
            drive_ep_at_snap: self.drive_ep,
            quarter: s.quarter,
            clock_seconds: s.clock_seconds,
            down: s.down,
            distance: s.distance,
            yardline: s.yardline,
            score: state.score,
            home_wp: self.home_wp,
        }
    }
}

/// Advances the game by one tick. A tick that fails validation leaves
/// `state` as it was before the tick.
pub fn tick(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng) -> SimResult<TickOutcome> {
    if state.is_final() {
        return Ok(TickOutcome::Final);
    }
    let before = state.clone();
    state.ticks += 1;

    let pat_pending = matches!(state.pending, PendingAction::Pat { .. });
    let outcome = if state.situation.clock_seconds == 0 && !pat_pending {
        phase_change(state, ctx)
    } else {
        let pending = state.pending;
        match pending {
            PendingAction::Kickoff {
                kicking_side,
                onside,
            } => special_teams::kickoff(state, ctx, rng, kicking_side, onside),
            PendingAction::Pat {
                side,
                kind,
                expected_points,
                score_index,
            } => special_teams::conversion(state, ctx, rng, side, kind, expected_points, score_index),
            PendingAction::None => snap(state, ctx, rng),
        }
    };

    if let Err(err) = state.validate() {
        tracing::error!(error = %err, tick = before.ticks + 1, "tick rolled back");
        *state = before;
        return Err(err);
    }
    Ok(outcome)
}

fn phase_change(state: &mut GameState, ctx: &TickContext) -> TickOutcome {
    let change = clock::advance_phase(state);
    let home_wp = ctx.home_wp(state);
    match change {
        PhaseChange::QuarterEnded(q) => {
            log_admin(state, PlayTag::EndOfQuarter, format!("End of quarter {q}"), home_wp);
            TickOutcome::QuarterEnded(q)
        }
        PhaseChange::Halftime => {
            log_admin(state, PlayTag::Halftime, "Halftime".to_string(), home_wp);
            TickOutcome::Halftime
        }
        PhaseChange::Final => {
            let score = state.score;
            log_admin(
                state,
                PlayTag::Final,
                format!("Final: {}-{}", score.home, score.away),
                home_wp,
            );
            tracing::info!(home = score.home, away = score.away, "game final");
            TickOutcome::Final
        }
        PhaseChange::None => TickOutcome::Advanced,
    }
}

/// Logs a non-play entry (timeouts, warnings, quarter breaks).
pub(crate) fn log_admin(state: &mut GameState, tag: PlayTag, description: String, home_wp: f64) {
    let s = state.situation;
    state.events.push(PlayEvent {
        tag,
        description,
        offense: s.possession,
        is_scoring: false,
        epa: 0.0,
        wpa: 0.0,
        drive_ep_at_snap: 0.0,
        quarter: s.quarter,
        clock_seconds: s.clock_seconds,
        down: s.down,
        distance: s.distance,
        yardline: s.yardline,
        score: state.score,
        home_wp,
    });
}

pub(crate) fn log_clock_report(state: &mut GameState, report: &ClockReport, ctx: &TickContext) {
    if report.timeout.is_none() && !report.two_minute_warning {
        return;
    }
    let home_wp = ctx.home_wp(state);
    if let Some(side) = report.timeout {
        let team = ctx.matchup.team(side);
        let left = state.timeouts.get(side);
        log_admin(
            state,
            PlayTag::Timeout,
            format!("Timeout {} ({left} left)", team.abbr),
            home_wp,
        );
    }
    if report.two_minute_warning {
        log_admin(state, PlayTag::TwoMinuteWarning, "Two-minute warning".to_string(), home_wp);
    }
}

fn snap(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng) -> TickOutcome {
    let drive_ep = ctx.drive_ep(state);
    if state.open_drive().is_none() {
        state.start_drive(drive_ep);
    }
    let pre = PreSnap::take(state, ctx, drive_ep);

    let flag_rate = ctx.config().penalty_rate.clamp(0.0, 1.0);
    if !state.penalty_cooldown
        && rng.gen_bool(flag_rate)
        && presnap_penalty(state, ctx, rng, &pre)
    {
        return TickOutcome::Replay;
    }
    state.penalty_cooldown = false;

    let outcome = match choose_play_kind(state, ctx, rng) {
        PlayKind::Run => run(state, ctx, rng),
        PlayKind::Pass => pass(state, ctx, rng),
        PlayKind::Kneel => kneel(state, ctx),
        PlayKind::FourthDownTry => fourth_down_try(state, ctx, rng),
        PlayKind::FieldGoal => special_teams::field_goal(state, ctx, rng),
        PlayKind::Punt => special_teams::punt(state, ctx, rng),
    };
    finish_snap(state, ctx, &pre, outcome);
    TickOutcome::Advanced
}

pub fn choose_play_kind(state: &GameState, ctx: &TickContext, rng: &mut impl Rng) -> PlayKind {
    if clock::can_kneel_out(state) {
        return PlayKind::Kneel;
    }
    if state.situation.down >= 4 {
        return match drive_ep::fourth_down_call(state, &ctx.matchup, ctx.config()) {
            FourthDownCall::GoForIt => PlayKind::FourthDownTry,
            FourthDownCall::FieldGoal => PlayKind::FieldGoal,
            FourthDownCall::Punt => PlayKind::Punt,
        };
    }
    if rng.gen_bool(pass_rate(state, ctx.config())) {
        PlayKind::Pass
    } else {
        PlayKind::Run
    }
}

/// Probability the offense passes on a 1st-3rd down snap.
pub fn pass_rate(state: &GameState, config: &SimConfig) -> f64 {
    let s = &state.situation;
    let mut rate = BASE_PASS_RATE;
    if s.down >= 3 {
        rate += 0.10;
    }
    if s.distance >= 7 {
        rate += 0.06;
    } else if s.distance <= 2 {
        rate -= 0.08;
    }

    let margin = state.score.margin_for(s.possession);
    if s.quarter == 4 && s.clock_seconds <= 600 {
        if margin < 0 {
            rate += 0.10;
        } else if margin > 0 {
            rate -= 0.12;
        }
    } else if s.quarter == 2 && s.clock_seconds <= 120 {
        rate += 0.08;
    } else if margin <= -14 {
        rate += 0.05;
    }

    (rate + config.pass_bias).clamp(MIN_PASS_RATE, MAX_PASS_RATE)
}

/// Enforces a false start or offside. Returns false, leaving the state
/// untouched, when the half-distance rule leaves no yardage to walk off.
fn presnap_penalty(
    state: &mut GameState,
    ctx: &TickContext,
    rng: &mut impl Rng,
    pre: &PreSnap,
) -> bool {
    let offense = state.situation.possession;
    let on_offense = rng.gen_bool(0.55);
    let s = &mut state.situation;
    let yards = if on_offense {
        PENALTY_YARDS.min(s.yardline / 2)
    } else {
        PENALTY_YARDS.min(s.yards_to_goal() / 2)
    };
    if yards == 0 {
        return false;
    }

    let description = if on_offense {
        s.yardline -= yards;
        s.distance += yards;
        format!("False start, {}, {yards} yards", ctx.matchup.team(offense).abbr)
    } else {
        let spot = s.yardline + yards;
        if yards >= s.distance {
            s.first_down(offense, spot);
        } else {
            s.yardline = spot;
            s.distance -= yards;
        }
        format!("Offside, {}, {yards} yards", ctx.matchup.team(offense.other()).abbr)
    };
    state.penalty_cooldown = true;

    let post_ep = ctx.drive_ep(state);
    let home_wp = ctx.home_wp(state);
    let mut event = pre.event(state, PlayTag::Penalty, description);
    event.epa = post_ep - pre.drive_ep;
    event.wpa = pre.wpa(home_wp);
    event.home_wp = home_wp;
    state.events.push(event);
    true
}

fn kneel(state: &GameState, ctx: &TickContext) -> PlayOutcome {
    let s = &state.situation;
    let qb = ctx
        .matchup
        .team(s.possession)
        .starter(Position::QB)
        .map(|idx| ctx.matchup.team(s.possession).player(idx).name.clone())
        .unwrap_or_else(|| "QB".to_string());
    let yards = if s.yardline > 1 { -1 } else { 0 };
    PlayOutcome {
        tag: PlayTag::Kneel,
        description: format!("{qb} kneels"),
        yards,
        clock: ClockContext::running(KNEEL_PLAY_SECS),
        next: Next::Continue,
    }
}

fn run(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng) -> PlayOutcome {
    let s = state.situation;
    let offense = s.possession;
    let team = ctx.matchup.team(offense);
    let defense = ctx.matchup.team(offense.other());
    let short_yardage = s.distance <= 2;

    let pool = carrier_pool(team, state, offense, short_yardage);
    let Some(carrier) = weighted_pick(rng, &pool) else {
        return kneel(state, ctx);
    };
    let player = team.player(carrier);

    let bonus = if short_yardage {
        (player.power - 65.0) * 0.03
    } else {
        (player.speed - 70.0) * 0.03
    };
    let mean = 4.2 + 0.08 * (team.offense - defense.defense) + bonus;
    let raw = normal_draw(rng, mean, 4.5 * ctx.config().variance);
    let yards = clamp_gain(&s, raw.round() as i32);
    carry(state, ctx, rng, PlayTag::Run, carrier, yards, "run")
}

/// Books a ball carry (designed run or scramble) and decides where it ends.
fn carry(
    state: &mut GameState,
    ctx: &TickContext,
    rng: &mut impl Rng,
    tag: PlayTag,
    carrier: usize,
    yards: i32,
    verb: &str,
) -> PlayOutcome {
    let s = state.situation;
    let offense = s.possession;
    let team = ctx.matchup.team(offense);
    let name = team.player(carrier).name.clone();

    let line = state.box_score.line_mut(offense, carrier);
    line.carries += 1;
    line.rush_yards += yards;

    let play_seconds = rng.gen_range(4..=7);
    if yards >= s.yards_to_goal() {
        state.box_score.line_mut(offense, carrier).rush_td += 1;
        return PlayOutcome {
            tag,
            description: format!("{name} {yards}-yard {verb}, TOUCHDOWN"),
            yards,
            clock: ClockContext::stopped(play_seconds),
            next: Next::Touchdown,
        };
    }

    credit_tackle(state, ctx, rng, offense.other());
    if rng.gen_bool(FUMBLE_LOST_RATE) {
        state.box_score.line_mut(offense, carrier).fumbles_lost += 1;
        return PlayOutcome {
            tag,
            description: format!("{name} {yards}-yard {verb}, FUMBLE lost"),
            yards,
            clock: ClockContext::stopped(play_seconds),
            next: Next::ChangeOfPossession {
                result: DriveResult::Fumble,
                yardline: 100 - (s.yardline + yards),
            },
        };
    }

    PlayOutcome {
        tag,
        description: format!("{name} {} {verb}", yards_phrase(yards)),
        yards,
        clock: ClockContext {
            in_bounds: rng.gen_bool(0.88),
            play_seconds,
        },
        next: Next::Continue,
    }
}

fn pass(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng) -> PlayOutcome {
    let s = state.situation;
    let offense = s.possession;
    let team = ctx.matchup.team(offense);
    let defense = ctx.matchup.team(offense.other());
    let config = ctx.config();

    let Some(qb_idx) = team.starter(Position::QB) else {
        return run(state, ctx, rng);
    };
    let qb = team.player(qb_idx);

    let mut pressure_rate = (0.22 + 0.012 * (defense.defense - team.offense)).clamp(0.08, 0.45);
    if offense == Side::Away {
        pressure_rate = (pressure_rate * 1.1).min(0.45);
    }
    let pressured = rng.gen_bool(pressure_rate);

    if pressured {
        let scramble_rate = (0.05 + (qb.speed - 50.0) / 200.0).clamp(0.02, 0.35);
        if rng.gen_bool(scramble_rate) {
            let raw = normal_draw(rng, 5.0 + (qb.speed - 60.0) * 0.05, 4.0 * config.variance);
            let yards = clamp_gain(&s, raw.round() as i32);
            return carry(state, ctx, rng, PlayTag::Scramble, qb_idx, yards, "scramble");
        }
        if rng.gen_bool(SACK_GIVEN_PRESSURE) {
            return sack(state, ctx, rng, qb_idx);
        }
    }

    let targets = target_pool(team);
    let Some(target_idx) = weighted_pick(rng, &targets) else {
        return run(state, ctx, rng);
    };
    let target = team.player(target_idx);
    let qb_name = qb.name.clone();
    let target_name = target.name.clone();

    let max_depth = s.yards_to_goal().min(45);
    let depth_raw = normal_draw(rng, 8.0 + (target.speed - 70.0) * 0.05, 6.0 * config.variance);
    let depth = (depth_raw.round() as i32).clamp(-3, max_depth);

    state.box_score.line_mut(offense, qb_idx).pass_att += 1;
    state.box_score.line_mut(offense, target_idx).targets += 1;

    let pressure_flag = if pressured { 1.0 } else { 0.0 };
    let int_rate = (0.025
        + (defense.defense - team.offense) * 0.001
        + 0.02 * pressure_flag
        + depth.max(0) as f64 * 0.0008)
        .clamp(0.005, 0.08);
    if rng.gen_bool(int_rate) {
        return interception(state, ctx, rng, qb_idx, depth, &qb_name, &target_name);
    }

    let completion = (0.64 + (qb.accuracy - 70.0) * 0.006
        - (defense.defense - team.offense) * 0.004
        - depth as f64 * 0.008
        - 0.15 * pressure_flag
        - config.weather.passing_penalty())
    .clamp(0.2, 0.85);
    let play_seconds = rng.gen_range(5..=8);
    if !rng.gen_bool(completion) {
        return PlayOutcome {
            tag: PlayTag::Pass,
            description: format!("{qb_name} pass incomplete intended for {target_name}"),
            yards: 0,
            clock: ClockContext::stopped(play_seconds),
            next: Next::Continue,
        };
    }

    let yac = normal_draw(rng, 4.0 + (target.speed - 70.0) * 0.05, 3.0 * config.variance)
        .max(0.0)
        .round() as i32;
    let yards = clamp_gain(&s, depth + yac);

    let passer = state.box_score.line_mut(offense, qb_idx);
    passer.completions += 1;
    passer.pass_yards += yards;
    let receiver = state.box_score.line_mut(offense, target_idx);
    receiver.receptions += 1;
    receiver.rec_yards += yards;

    if yards >= s.yards_to_goal() {
        state.box_score.line_mut(offense, qb_idx).pass_td += 1;
        state.box_score.line_mut(offense, target_idx).rec_td += 1;
        return PlayOutcome {
            tag: PlayTag::Pass,
            description: format!("{qb_name} {yards}-yard pass to {target_name}, TOUCHDOWN"),
            yards,
            clock: ClockContext::stopped(play_seconds),
            next: Next::Touchdown,
        };
    }

    credit_tackle(state, ctx, rng, offense.other());
    if rng.gen_bool(FUMBLE_LOST_RATE) {
        state.box_score.line_mut(offense, target_idx).fumbles_lost += 1;
        return PlayOutcome {
            tag: PlayTag::Pass,
            description: format!(
                "{qb_name} pass to {target_name} for {yards}, FUMBLE lost"
            ),
            yards,
            clock: ClockContext::stopped(play_seconds),
            next: Next::ChangeOfPossession {
                result: DriveResult::Fumble,
                yardline: 100 - (s.yardline + yards),
            },
        };
    }

    PlayOutcome {
        tag: PlayTag::Pass,
        description: format!("{qb_name} pass to {target_name} for {}", yards_phrase(yards)),
        yards,
        clock: ClockContext {
            in_bounds: rng.gen_bool(0.72),
            play_seconds,
        },
        next: Next::Continue,
    }
}

fn sack(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng, qb_idx: usize) -> PlayOutcome {
    let s = state.situation;
    let offense = s.possession;
    let team = ctx.matchup.team(offense);
    let defense = ctx.matchup.team(offense.other());

    let raw = normal_draw(rng, -6.5, 2.0 * ctx.config().variance);
    let yards = clamp_gain(&s, (raw.round() as i32).min(-1));
    state.box_score.line_mut(offense, qb_idx).sacks_taken += 1;

    let rushers: Vec<(usize, f64)> = defense
        .defenders()
        .filter(|(_, p)| matches!(p.position, Position::DL | Position::LB))
        .map(|(i, p)| (i, p.pass_rush.max(1.0)))
        .collect();
    let by = match weighted_pick(rng, &rushers) {
        Some(idx) => {
            let line = state.box_score.line_mut(offense.other(), idx);
            line.sacks += 1;
            line.tackles += 1;
            format!(" by {}", defense.player(idx).name)
        }
        None => String::new(),
    };

    PlayOutcome {
        tag: PlayTag::Sack,
        description: format!("{} sacked for {}{by}", team.player(qb_idx).name, yards_phrase(yards)),
        yards,
        clock: ClockContext::running(rng.gen_range(4..=6)),
        next: Next::Continue,
    }
}

fn interception(
    state: &mut GameState,
    ctx: &TickContext,
    rng: &mut impl Rng,
    qb_idx: usize,
    depth: i32,
    qb_name: &str,
    target_name: &str,
) -> PlayOutcome {
    let s = state.situation;
    let offense = s.possession;
    let defense = ctx.matchup.team(offense.other());

    let catch_spot = (s.yardline + depth.max(0)).clamp(1, 99);
    let ret = normal_draw(rng, 8.0, 6.0).clamp(0.0, 30.0).round() as i32;
    let new_yardline = (100 - catch_spot + ret).clamp(1, 99);

    state.box_score.line_mut(offense, qb_idx).interceptions_thrown += 1;
    let cover: Vec<(usize, f64)> = defense
        .defenders()
        .map(|(i, p)| {
            let w = if p.position == Position::DB { p.coverage } else { p.coverage * 0.3 };
            (i, w.max(1.0))
        })
        .collect();
    let by = match weighted_pick(rng, &cover) {
        Some(idx) => {
            let line = state.box_score.line_mut(offense.other(), idx);
            line.interceptions += 1;
            line.returns += 1;
            line.return_yards += ret;
            format!(" by {}", defense.player(idx).name)
        }
        None => String::new(),
    };

    PlayOutcome {
        tag: PlayTag::Pass,
        description: format!("{qb_name} pass intended for {target_name} INTERCEPTED{by}, returned {ret} yards"),
        yards: 0,
        clock: ClockContext::stopped(rng.gen_range(5..=9)),
        next: Next::ChangeOfPossession {
            result: DriveResult::Interception,
            yardline: new_yardline,
        },
    }
}

/// A single conversion draw on a true 4th-down go decision.
fn fourth_down_try(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng) -> PlayOutcome {
    let s = state.situation;
    let offense = s.possession;
    let team = ctx.matchup.team(offense);
    let defense = ctx.matchup.team(offense.other());

    let p = (drive_ep::conversion_probability(4, s.distance as f64)
        + (team.offense - defense.defense) * 0.005)
        .clamp(0.05, 0.9);
    let converted = rng.gen_bool(p);
    let play_seconds = rng.gen_range(4..=7);

    if converted {
        let extra = rng.gen_range(0..=4);
        let yards = (s.distance + extra).min(s.yards_to_goal());
        if yards >= s.yards_to_goal() {
            return PlayOutcome {
                tag: PlayTag::FourthDownTry,
                description: format!("{} converts on 4th-and-{}, TOUCHDOWN", team.abbr, s.distance),
                yards,
                clock: ClockContext::stopped(play_seconds),
                next: Next::Touchdown,
            };
        }
        return PlayOutcome {
            tag: PlayTag::FourthDownTry,
            description: format!("{} converts on 4th-and-{} for {yards}", team.abbr, s.distance),
            yards,
            clock: ClockContext::running(play_seconds),
            next: Next::Continue,
        };
    }

    let yards = if s.distance > 1 { rng.gen_range(0..s.distance) } else { 0 };
    PlayOutcome {
        tag: PlayTag::FourthDownTry,
        description: format!("{} stopped on 4th-and-{}, turnover on downs", team.abbr, s.distance),
        yards,
        clock: ClockContext::stopped(play_seconds),
        next: Next::ChangeOfPossession {
            result: DriveResult::Downs,
            yardline: 100 - (s.yardline + yards),
        },
    }
}

/// Clock, chains, scoring and the event log for a resolved snap.
pub(crate) fn finish_snap(state: &mut GameState, ctx: &TickContext, pre: &PreSnap, play: PlayOutcome) {
    let offense = pre.situation.possession;
    state.record_drive_play(play.yards);

    let runoff = clock::between_play_runoff(state);
    let report = clock::apply_clock(state, runoff, play.clock, ctx.config());

    let next = match play.next {
        Next::Continue => advance_chains(state, play.yards),
        other => other,
    };
    let realized = match next {
        Next::Continue => 0.0,
        Next::Touchdown => {
            score_touchdown(state, ctx, offense, &play.description);
            TOUCHDOWN_POINTS
        }
        Next::FieldGoal => {
            score_field_goal(state, offense, &play.description);
            FIELD_GOAL_POINTS
        }
        Next::ChangeOfPossession { result, yardline } => {
            change_possession(state, ctx, result, yardline);
            0.0
        }
    };

    let home_wp = ctx.home_wp(state);
    let mut event = pre.event(state, play.tag, play.description);
    event.is_scoring = matches!(next, Next::Touchdown | Next::FieldGoal);
    event.epa = realized - pre.drive_ep;
    event.wpa = pre.wpa(home_wp);
    event.home_wp = home_wp;
    state.events.push(event);

    log_clock_report(state, &report, ctx);
}

/// Moves the chains after a gain that kept the ball with the offense.
fn advance_chains(state: &mut GameState, yards: i32) -> Next {
    let s = &mut state.situation;
    let spot = (s.yardline + yards).clamp(1, 99);
    let to_gain = s.distance - yards;
    if to_gain <= 0 {
        let offense = s.possession;
        s.first_down(offense, spot);
        return Next::Continue;
    }
    if s.down >= 4 {
        return Next::ChangeOfPossession {
            result: DriveResult::Downs,
            yardline: 100 - spot,
        };
    }
    s.yardline = spot;
    s.down += 1;
    s.distance = to_gain;
    Next::Continue
}

fn score_touchdown(state: &mut GameState, ctx: &TickContext, side: Side, description: &str) {
    state.score.add(side, TOUCHDOWN_POINTS as u32);
    state.scoring.push(ScoringPlay {
        quarter: state.situation.quarter,
        clock_seconds: state.situation.clock_seconds,
        side,
        kind: ScoreKind::Touchdown,
        points: TOUCHDOWN_POINTS as u32,
        description: description.to_string(),
        pat: None,
    });
    let score_index = state.scoring.len() - 1;
    state.situation.first_down(side, CONVERSION_YARDLINE);
    let (kind, expected_points) = special_teams::choose_conversion(state, ctx, side);
    state.pending = PendingAction::Pat {
        side,
        kind,
        expected_points,
        score_index,
    };
    tracing::debug!(side = side.label(), ?kind, "touchdown");
}

fn score_field_goal(state: &mut GameState, side: Side, description: &str) {
    state.score.add(side, FIELD_GOAL_POINTS as u32);
    state.scoring.push(ScoringPlay {
        quarter: state.situation.quarter,
        clock_seconds: state.situation.clock_seconds,
        side,
        kind: ScoreKind::FieldGoal,
        points: FIELD_GOAL_POINTS as u32,
        description: description.to_string(),
        pat: None,
    });
    state.close_drive(DriveResult::FieldGoal, FIELD_GOAL_POINTS as u32);
    state.pending = PendingAction::Kickoff {
        kicking_side: side,
        onside: special_teams::wants_onside(state, side),
    };
}

fn change_possession(state: &mut GameState, ctx: &TickContext, result: DriveResult, yardline: i32) {
    state.close_drive(result, 0);
    let new_offense = state.situation.possession.other();
    state.situation.first_down(new_offense, yardline);
    let ep = ctx.drive_ep(state);
    state.start_drive(ep);
}

/// Keeps a gain between the offense's 1 and the goal line.
fn clamp_gain(s: &Situation, yards: i32) -> i32 {
    yards.clamp(-(s.yardline - 1).max(0), s.yards_to_goal())
}

fn yards_phrase(yards: i32) -> String {
    match yards {
        0 => "no gain".to_string(),
        y if y < 0 => format!("a loss of {}", -y),
        1 => "1 yard".to_string(),
        y => format!("{y} yards"),
    }
}

pub(crate) fn normal_draw(rng: &mut impl Rng, mean: f64, sd: f64) -> f64 {
    match Normal::new(mean, sd.max(0.1)) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

pub(crate) fn weighted_pick(rng: &mut impl Rng, pool: &[(usize, f64)]) -> Option<usize> {
    let dist = WeightedIndex::new(pool.iter().map(|(_, w)| *w)).ok()?;
    pool.get(dist.sample(rng)).map(|(idx, _)| *idx)
}

fn credit_tackle(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng, defense: Side) {
    let team = ctx.matchup.team(defense);
    let pool: Vec<(usize, f64)> = team
        .defenders()
        .map(|(i, p)| {
            let w = match p.position {
                Position::LB => 1.5,
                Position::DB => 1.0,
                _ => 0.9,
            };
            (i, w)
        })
        .collect();
    if let Some(idx) = weighted_pick(rng, &pool) {
        state.box_score.line_mut(defense, idx).tackles += 1;
    }
}

fn fatigue(carries: u32) -> f64 {
    if carries > FATIGUE_CARRIES {
        (1.0 - 0.04 * (carries - FATIGUE_CARRIES) as f64).max(0.3)
    } else {
        1.0
    }
}

fn carrier_pool(team: &TeamRatings, state: &GameState, side: Side, short_yardage: bool) -> Vec<(usize, f64)> {
    let short = if short_yardage { 2.0 } else { 1.0 };
    let mut pool = Vec::new();
    for (depth, weight) in [(1, 0.62), (2, 0.22), (3, 0.05)] {
        if let Some(idx) = team.at_depth(Position::RB, depth) {
            pool.push((idx, weight * fatigue(state.box_score.line(side, idx).carries)));
        }
    }
    if let Some(idx) = team.starter(Position::WR) {
        pool.push((idx, 0.04));
    }
    if let Some(idx) = team.starter(Position::FB) {
        pool.push((idx, 0.04 * short));
    }
    if let Some(idx) = team.starter(Position::QB)
        && team.player(idx).speed >= 70.0
    {
        pool.push((idx, 0.05 * short));
    }
    pool
}

fn target_pool(team: &TeamRatings) -> Vec<(usize, f64)> {
    let slots = [
        (Position::WR, 1, 0.30),
        (Position::WR, 2, 0.22),
        (Position::WR, 3, 0.12),
        (Position::TE, 1, 0.18),
        (Position::RB, 1, 0.12),
        (Position::FB, 1, 0.03),
    ];
    slots
        .iter()
        .filter_map(|(pos, depth, weight)| {
            let idx = team.at_depth(*pos, *depth)?;
            Some((idx, weight * hands_factor(team.player(idx))))
        })
        .collect()
}

fn hands_factor(player: &PlayerRatings) -> f64 {
    (player.hands / 70.0).clamp(0.5, 1.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::error::SimError;
    use crate::ratings::demo_matchup;
    use crate::state::Score;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn live(quarter: u8, clock: u32, down: u8, distance: i32, yardline: i32, score: Score) -> GameState {
        GameState::at(
            Situation {
                quarter,
                clock_seconds: clock,
                down,
                distance,
                yardline,
                possession: Side::Home,
            },
            score,
        )
    }

    #[test]
    fn pass_rate_stays_clamped() {
        let cfg = SimConfig {
            pass_bias: 0.5,
            ..SimConfig::default()
        };
        let state = live(4, 100, 3, 12, 40, Score { home: 0, away: 21 });
        assert_eq!(pass_rate(&state, &cfg), MAX_PASS_RATE);
        let cfg = SimConfig {
            pass_bias: -0.5,
            ..SimConfig::default()
        };
        assert_eq!(pass_rate(&state, &cfg), MIN_PASS_RATE);
    }

    #[test]
    fn short_fourth_at_the_goal_line_goes_for_it() {
        let (home, away) = demo_matchup();
        let cfg = SimConfig {
            penalty_rate: 0.0,
            ..SimConfig::default()
        };
        let ctx = TickContext {
            matchup: Matchup::new(&home, &away),
            models: Models::closed_form(&cfg),
            prior: 0.5,
        };
        let mut state = live(4, 200, 4, 1, 97, Score { home: 10, away: 17 });
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(choose_play_kind(&state, &ctx, &mut rng), PlayKind::FourthDownTry);

        assert_eq!(tick(&mut state, &ctx, &mut rng).unwrap(), TickOutcome::Advanced);
        let play = state.events.iter().find(|e| !e.tag.is_administrative()).unwrap();
        assert_eq!(play.tag, PlayTag::FourthDownTry);
        if state.situation.possession == Side::Away {
            assert_eq!(state.drives.len(), 2);
            assert_eq!(state.drives[0].result, Some(DriveResult::Downs));
        } else {
            assert_eq!(state.drives.len(), 1);
        }
    }

    #[test]
    fn flag_replays_the_down_once() {
        let (home, away) = demo_matchup();
        let cfg = SimConfig {
            penalty_rate: 1.0,
            ..SimConfig::default()
        };
        let ctx = TickContext {
            matchup: Matchup::new(&home, &away),
            models: Models::closed_form(&cfg),
            prior: 0.5,
        };
        let mut state = live(1, 600, 2, 6, 40, Score::default());
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        assert_eq!(tick(&mut state, &ctx, &mut rng).unwrap(), TickOutcome::Replay);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events[0].tag, PlayTag::Penalty);
        assert_eq!(state.situation.clock_seconds, 600);
        assert!(state.situation.down == 2 || state.situation.down == 1);

        assert_eq!(tick(&mut state, &ctx, &mut rng).unwrap(), TickOutcome::Advanced);
        assert_ne!(state.events[1].tag, PlayTag::Penalty);
    }

    #[test]
    fn leader_kneels_out_the_clock() {
        let (home, away) = demo_matchup();
        let cfg = SimConfig {
            penalty_rate: 0.0,
            ..SimConfig::default()
        };
        let ctx = TickContext {
            matchup: Matchup::new(&home, &away),
            models: Models::closed_form(&cfg),
            prior: 0.5,
        };
        let mut state = live(4, 75, 1, 10, 60, Score { home: 24, away: 20 });
        state.timeouts.away = 0;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        tick(&mut state, &ctx, &mut rng).unwrap();
        assert_eq!(state.events[0].tag, PlayTag::Kneel);
        assert_eq!(state.situation.clock_seconds, 35);
        assert_eq!(state.situation.down, 2);
    }

    #[test]
    fn turnover_on_downs_flips_the_field() {
        let mut state = live(2, 400, 4, 3, 70, Score::default());
        let next = advance_chains(&mut state, 1);
        assert_eq!(
            next,
            Next::ChangeOfPossession {
                result: DriveResult::Downs,
                yardline: 29
            }
        );
    }

    #[test]
    fn gains_never_leave_the_field() {
        let s = live(1, 900, 1, 10, 3, Score::default()).situation;
        assert_eq!(clamp_gain(&s, -12), -2);
        assert_eq!(clamp_gain(&s, 150), 97);
    }

    fn plain_play(tag: PlayTag) -> bool {
        matches!(
            tag,
            PlayTag::Run
                | PlayTag::Pass
                | PlayTag::Scramble
                | PlayTag::Sack
                | PlayTag::Kneel
                | PlayTag::FourthDownTry
                | PlayTag::Punt
        )
    }

    #[test]
    fn plain_plays_book_realized_points_only() {
        let (home, away) = demo_matchup();
        let cfg = SimConfig {
            penalty_rate: 0.0,
            ..SimConfig::default()
        };
        let ctx = TickContext {
            matchup: Matchup::new(&home, &away),
            models: Models::closed_form(&cfg),
            prior: 0.5,
        };
        let mut checked = 0;
        for seed in 0..40 {
            let mut state = live(1, 900, 1, 10, 25, Score::default());
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            tick(&mut state, &ctx, &mut rng).unwrap();
            let play = state.events.iter().find(|e| !e.tag.is_administrative()).unwrap();
            assert!(plain_play(play.tag));
            let realized = if play.is_scoring { TOUCHDOWN_POINTS } else { 0.0 };
            assert_eq!(play.epa, realized - play.drive_ep_at_snap);
            if !play.is_scoring && state.situation.possession == Side::Home {
                assert_eq!(play.epa, -play.drive_ep_at_snap);
                checked += 1;
            }
        }
        assert!(checked > 0);
    }

    #[test]
    fn failed_validation_rolls_the_tick_back() {
        let (home, away) = demo_matchup();
        let cfg = SimConfig::default();
        let ctx = TickContext {
            matchup: Matchup::new(&home, &away),
            models: Models::closed_form(&cfg),
            prior: 0.5,
        };
        let mut state = live(1, 0, 2, 7, 40, Score::default());
        state.timeouts.home = 5;
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let err = tick(&mut state, &ctx, &mut rng).unwrap_err();
        assert!(matches!(err, SimError::InvariantViolation(_)));
        assert_eq!(state.situation.quarter, 1);
        assert_eq!(state.situation.clock_seconds, 0);
        assert_eq!(state.ticks, 0);
        assert!(state.events.is_empty());
    }

    #[test]
    fn flag_with_no_yardage_is_not_called() {
        let (home, away) = demo_matchup();
        let cfg = SimConfig {
            penalty_rate: 1.0,
            ..SimConfig::default()
        };
        let ctx = TickContext {
            matchup: Matchup::new(&home, &away),
            models: Models::closed_form(&cfg),
            prior: 0.5,
        };
        let mut offsides = 0;
        for seed in 0..30 {
            let mut state = live(1, 600, 1, 10, 1, Score::default());
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let outcome = tick(&mut state, &ctx, &mut rng).unwrap();
            let flag = state.events.iter().find(|e| e.tag == PlayTag::Penalty);
            if outcome == TickOutcome::Replay {
                let flag = flag.unwrap();
                assert!(flag.description.starts_with("Offside"), "{}", flag.description);
                assert!(state.penalty_cooldown);
                offsides += 1;
            } else {
                assert!(flag.is_none());
                assert!(!state.penalty_cooldown);
            }
            assert!(
                state
                    .events
                    .iter()
                    .filter(|e| e.tag == PlayTag::Penalty)
                    .all(|e| !e.description.ends_with(" 0 yards"))
            );
        }
        assert!(offsides > 0 && offsides < 30);
    }
}
