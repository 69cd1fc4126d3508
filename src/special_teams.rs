//! Kickoffs, conversion tries, field goals and punts.

use rand::Rng;

use crate::clock::{self, ClockContext};
use crate::config::Weather;
use crate::drive_ep::{field_goal_make_probability, kick_distance, kicker_skill};
use crate::play::{self, Next, PlayOutcome, PreSnap, TickContext, TickOutcome, normal_draw};
use crate::ratings::{Position, TeamRatings};
use crate::state::{DriveResult, GameState, PatKind, PatOutcome, PendingAction, PlayTag, Side};

pub const KICKOFF_TOUCHBACK_YARDLINE: i32 = 25;
pub const PUNT_TOUCHBACK_YARDLINE: i32 = 20;
/// Kicking team's yardline after a recovered onside kick.
pub const ONSIDE_RECOVERY_YARDLINE: i32 = 45;
/// Yards behind the line of scrimmage a missed field goal is spotted.
const MISSED_FG_SPOT_BACK: i32 = 7;

/// Whether the kicking side tries an onside kick.
pub fn wants_onside(state: &GameState, kicking_side: Side) -> bool {
    let s = &state.situation;
    if s.quarter != 4 {
        return false;
    }
    let deficit = -state.score.margin_for(kicking_side);
    let clock = s.clock_seconds;
    (deficit > 16 && clock <= 600) || (deficit > 8 && clock <= 300) || (deficit > 0 && clock <= 150)
}

pub fn onside_success_probability(kicking: &TeamRatings, receiving: &TeamRatings) -> f64 {
    (0.12 + (kicking.special - receiving.special) * 0.003).clamp(0.08, 0.18)
}

pub fn touchback_probability(kicking: &TeamRatings, weather: &Weather) -> f64 {
    let leg = kicker_skill(kicking);
    (0.55 + (kicking.special - 60.0) * 0.01 + (leg - 70.0) * 0.005 - weather.wind_mph * 0.004)
        .clamp(0.2, 0.85)
}

pub fn extra_point_probability(kicker: f64, weather: &Weather) -> f64 {
    (0.94 + (kicker - 70.0) * 0.002 - weather.kicking_accuracy_penalty()).clamp(0.85, 0.995)
}

pub fn two_point_probability(offense: &TeamRatings, defense: &TeamRatings) -> f64 {
    (0.48 + (offense.offense - defense.defense) * 0.004).clamp(0.35, 0.6)
}

/// Kick or go for two after a touchdown, by the margin with the six points
/// already on the board.
pub fn conversion_kind(state: &GameState, side: Side) -> PatKind {
    let s = &state.situation;
    let q4 = s.quarter == 4;
    let go_for_two = match state.score.margin_for(side) {
        -2 => true,
        -1 => q4 && s.clock_seconds <= 90,
        1 | 2 => q4 && s.clock_seconds <= 180,
        -5 | -10 => q4,
        _ => false,
    };
    if go_for_two {
        PatKind::TwoPoint
    } else {
        PatKind::ExtraPoint
    }
}

/// The chosen try and its expected points.
pub fn choose_conversion(state: &GameState, ctx: &TickContext, side: Side) -> (PatKind, f64) {
    let kind = conversion_kind(state, side);
    let offense = ctx.matchup.team(side);
    let expected = match kind {
        PatKind::ExtraPoint => extra_point_probability(kicker_skill(offense), &ctx.config().weather),
        PatKind::TwoPoint => 2.0 * two_point_probability(offense, ctx.matchup.team(side.other())),
    };
    (kind, expected)
}

/// Resolves a pending try, annotates its scoring entry and closes the drive.
pub(crate) fn conversion(
    state: &mut GameState,
    ctx: &TickContext,
    rng: &mut impl Rng,
    side: Side,
    kind: PatKind,
    expected_points: f64,
    score_index: usize,
) -> TickOutcome {
    let pre = PreSnap::take(state, ctx, expected_points);
    let offense = ctx.matchup.team(side);
    let defense = ctx.matchup.team(side.other());

    let (p, tag) = match kind {
        PatKind::ExtraPoint => (
            extra_point_probability(kicker_skill(offense), &ctx.config().weather),
            PlayTag::ExtraPoint,
        ),
        PatKind::TwoPoint => (two_point_probability(offense, defense), PlayTag::TwoPoint),
    };
    let good = rng.gen_bool(p);
    let made = if good { kind.points() } else { 0 };

    if kind == PatKind::ExtraPoint
        && let Some(k) = offense.starter(Position::K)
    {
        let line = state.box_score.line_mut(side, k);
        line.xp_att += 1;
        line.xp_made += u32::from(good);
    }

    state.score.add(side, made);
    if let Some(entry) = state.scoring.get_mut(score_index) {
        entry.pat = Some(PatOutcome { kind, good });
    }
    state.close_drive(DriveResult::Touchdown, 6 + made);
    state.pending = PendingAction::Kickoff {
        kicking_side: side,
        onside: wants_onside(state, side),
    };

    let verdict = if good { "good" } else { "no good" };
    let description = match kind {
        PatKind::ExtraPoint => format!("{} extra point is {verdict}", offense.abbr),
        PatKind::TwoPoint => format!("{} two-point try is {verdict}", offense.abbr),
    };
    let home_wp = ctx.home_wp(state);
    let mut event = pre.event(state, tag, description);
    event.offense = side;
    event.is_scoring = good;
    event.epa = made as f64 - expected_points;
    event.wpa = pre.wpa(home_wp);
    event.home_wp = home_wp;
    state.events.push(event);
    TickOutcome::Advanced
}

/// Resolves a pending kickoff and opens the receiving side's drive.
pub(crate) fn kickoff(
    state: &mut GameState,
    ctx: &TickContext,
    rng: &mut impl Rng,
    kicking_side: Side,
    onside: bool,
) -> TickOutcome {
    let pre = PreSnap::take(state, ctx, 0.0);
    let receiving_side = kicking_side.other();
    let kicking = ctx.matchup.team(kicking_side);
    let receiving = ctx.matchup.team(receiving_side);
    let config = ctx.config();

    let (tag, description, offense, yardline, clock_ctx) = if onside {
        let p = onside_success_probability(kicking, receiving);
        if rng.gen_bool(p) {
            (
                PlayTag::OnsideKick,
                format!("{} onside kick recovered by the kicking team", kicking.abbr),
                kicking_side,
                ONSIDE_RECOVERY_YARDLINE,
                ClockContext::stopped(3),
            )
        } else {
            (
                PlayTag::OnsideKick,
                format!("{} onside kick recovered by {}", kicking.abbr, receiving.abbr),
                receiving_side,
                100 - ONSIDE_RECOVERY_YARDLINE,
                ClockContext::stopped(3),
            )
        }
    } else if rng.gen_bool(touchback_probability(kicking, &config.weather)) {
        (
            PlayTag::Kickoff,
            format!("{} kickoff, touchback", kicking.abbr),
            receiving_side,
            KICKOFF_TOUCHBACK_YARDLINE,
            ClockContext::stopped(0),
        )
    } else {
        let mean = 24.0 + (receiving.special - kicking.special) * 0.15;
        let ret = normal_draw(rng, mean, 6.0 * config.variance)
            .clamp(5.0, 60.0)
            .round() as i32;
        let returner = returner(receiving);
        let who = match returner {
            Some(idx) => {
                let line = state.box_score.line_mut(receiving_side, idx);
                line.returns += 1;
                line.return_yards += ret;
                format!(" by {}", receiving.player(idx).name)
            }
            None => String::new(),
        };
        (
            PlayTag::Kickoff,
            format!("{} kickoff returned to the {ret}{who}", kicking.abbr),
            receiving_side,
            ret,
            ClockContext::stopped(rng.gen_range(5..=8)),
        )
    };

    let report = clock::apply_clock(state, 0, clock_ctx, config);
    state.situation.first_down(offense, yardline);
    state.pending = PendingAction::None;
    let ep = ctx.drive_ep(state);
    state.start_drive(ep);

    let home_wp = ctx.home_wp(state);
    let mut event = pre.event(state, tag, description);
    event.offense = kicking_side;
    event.wpa = pre.wpa(home_wp);
    event.home_wp = home_wp;
    state.events.push(event);
    play::log_clock_report(state, &report, ctx);
    TickOutcome::Advanced
}

pub(crate) fn field_goal(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng) -> PlayOutcome {
    let s = state.situation;
    let team = ctx.matchup.team(s.possession);
    let distance = kick_distance(s.yardline);
    let p = field_goal_make_probability(distance as f64, kicker_skill(team), &ctx.config().weather);
    let good = rng.gen_bool(p);

    let kicker = team.starter(Position::K);
    if let Some(k) = kicker {
        let line = state.box_score.line_mut(s.possession, k);
        line.fg_att += 1;
        line.fg_made += u32::from(good);
    }
    let name = kicker
        .map(|k| team.player(k).name.clone())
        .unwrap_or_else(|| team.abbr.clone());
    let clock = ClockContext::stopped(rng.gen_range(4..=6));

    if good {
        return PlayOutcome {
            tag: PlayTag::FieldGoal,
            description: format!("{name} {distance}-yard field goal is GOOD"),
            yards: 0,
            clock,
            next: Next::FieldGoal,
        };
    }
    let spot = (100 - (s.yardline - MISSED_FG_SPOT_BACK)).clamp(PUNT_TOUCHBACK_YARDLINE, 99);
    PlayOutcome {
        tag: PlayTag::FieldGoal,
        description: format!("{name} {distance}-yard field goal is no good"),
        yards: 0,
        clock,
        next: Next::ChangeOfPossession {
            result: DriveResult::MissedFieldGoal,
            yardline: spot,
        },
    }
}

pub(crate) fn punt(state: &mut GameState, ctx: &TickContext, rng: &mut impl Rng) -> PlayOutcome {
    let s = state.situation;
    let kicking_side = s.possession;
    let receiving_side = kicking_side.other();
    let kicking = ctx.matchup.team(kicking_side);
    let receiving = ctx.matchup.team(receiving_side);
    let config = ctx.config();

    let punter = kicking.starter(Position::P);
    let leg = punter.map(|p| kicking.player(p).kicking).unwrap_or(60.0);
    let mean = 45.0 + (leg - 70.0) * 0.15 - config.weather.kicking_range_penalty() * 0.5;
    let gross = normal_draw(rng, mean, 6.0 * config.variance)
        .clamp(25.0, 70.0)
        .round() as i32;
    if let Some(p) = punter {
        let line = state.box_score.line_mut(kicking_side, p);
        line.punts += 1;
        line.punt_yards += gross;
    }

    let landing = s.yardline + gross;
    let (yardline, description) = if landing >= 100 {
        (
            PUNT_TOUCHBACK_YARDLINE,
            format!("{} punts {gross} yards into the end zone, touchback", kicking.abbr),
        )
    } else {
        let mean = 8.0 + (receiving.special - kicking.special) * 0.1;
        let ret = normal_draw(rng, mean, 5.0 * config.variance)
            .clamp(0.0, 25.0)
            .round() as i32;
        if let Some(idx) = returner(receiving) {
            let line = state.box_score.line_mut(receiving_side, idx);
            line.returns += 1;
            line.return_yards += ret;
        }
        (
            (100 - landing + ret).clamp(1, 99),
            format!("{} punts {gross} yards, returned {ret}", kicking.abbr),
        )
    };

    PlayOutcome {
        tag: PlayTag::Punt,
        description,
        yards: 0,
        clock: ClockContext::stopped(rng.gen_range(6..=10)),
        next: Next::ChangeOfPossession {
            result: DriveResult::Punt,
            yardline,
        },
    }
}

fn returner(team: &TeamRatings) -> Option<usize> {
    team.at_depth(Position::WR, 3)
        .or_else(|| team.at_depth(Position::RB, 2))
        .or_else(|| team.starter(Position::RB))
}
