use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

use gridiron_sim::calibration::{self, GameOutcome};
use gridiron_sim::config::SimConfig;
use gridiron_sim::historical_dataset;
use gridiron_sim::knn::{HistoricalRow, MetricsOutcome, StateFeatures};
use gridiron_sim::ratings::{self, TeamRatings};
use gridiron_sim::state::{GAME_SECONDS, PlayEvent, PlayTag, QUARTER_SECONDS, Score, Side};
use gridiron_sim::{SimError, Simulation};

const DEFAULT_GAMES: usize = 200;
const DEFAULT_SEED_BASE: u64 = 1;
const DEFAULT_BINS: usize = 10;

struct GameReport {
    seed: u64,
    score: Score,
    plays: usize,
    drives: usize,
    /// Home WP after every play, paired with the final result.
    wp_path: Vec<f64>,
    rows: Vec<HistoricalRow>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(true)
        .init();

    let games = parse_usize_arg("--games")
        .unwrap_or(DEFAULT_GAMES)
        .clamp(1, 100_000);
    let seed_base = parse_u64_arg("--seed-base").unwrap_or(DEFAULT_SEED_BASE);
    let bins = parse_usize_arg("--bins").unwrap_or(DEFAULT_BINS).clamp(2, 50);
    let config = SimConfig::from_env();
    let (home, away) = match parse_path_arg("--teams") {
        Some(path) => ratings::load_teams(&path)?,
        None => ratings::demo_matchup(),
    };

    let pool = build_pool();
    let run = || {
        (0..games as u64)
            .into_par_iter()
            .map(|i| simulate(&home, &away, &config, seed_base + i))
            .collect::<Result<Vec<_>, SimError>>()
    };
    let reports = match pool.as_ref() {
        Some(pool) => pool.install(run),
        None => run(),
    }
    .context("batch simulation failed")?;

    print_scoring(&home, &away, &reports);
    print_calibration(&reports, bins);

    if let Some(db_path) = parse_path_arg("--db") {
        let rows: Vec<HistoricalRow> = reports.iter().flat_map(|r| r.rows.iter().copied()).collect();
        if rows.is_empty() {
            return Err(anyhow!("no snaps to write"));
        }
        let mut conn = historical_dataset::open_db(&db_path)?;
        let written = historical_dataset::insert_rows(&mut conn, &rows)?;
        println!("wrote {written} historical rows to {}", db_path.display());
    }
    Ok(())
}

fn simulate(
    home: &TeamRatings,
    away: &TeamRatings,
    config: &SimConfig,
    seed: u64,
) -> Result<GameReport, SimError> {
    let cfg = SimConfig {
        seed: Some(seed),
        tick_delay_ms: 0,
        ..config.clone()
    };
    let mut sim = Simulation::with_model(home.clone(), away.clone(), cfg, None)?;
    sim.run_to_completion()?;

    let events = sim.events();
    let plays = events.iter().filter(|e| !e.tag.is_administrative()).count();
    let wp_path = events
        .iter()
        .filter(|e| !e.tag.is_administrative())
        .map(|e| e.home_wp)
        .collect();
    let score = sim.state().score;
    Ok(GameReport {
        seed,
        score,
        plays,
        drives: sim.drives().len(),
        wp_path,
        rows: snap_rows(events, score),
    })
}

/// Labels every scrimmage snap with the game result and the next score of
/// the half, both from the snapping team's side.
fn snap_rows(events: &[PlayEvent], final_score: Score) -> Vec<HistoricalRow> {
    let mut pre_scores = Vec::with_capacity(events.len());
    let mut running = Score::default();
    for event in events {
        pre_scores.push(running);
        running = event.score;
    }

    let mut rows = Vec::new();
    let mut next_score: Option<(Side, PlayTag)> = None;
    for (event, pre) in events.iter().zip(pre_scores).rev() {
        if event.tag == PlayTag::Halftime {
            next_score = None;
            continue;
        }
        if !is_scrimmage(event.tag) {
            continue;
        }
        if event.is_scoring {
            next_score = Some((event.offense, event.tag));
        }

        let side = event.offense;
        let (td, fg, points) = match next_score {
            Some((scorer, tag)) => {
                let sign = if scorer == side { 1.0 } else { -1.0 };
                if tag == PlayTag::FieldGoal {
                    (0.0, 1.0, 3.0 * sign)
                } else {
                    (1.0, 0.0, 7.0 * sign)
                }
            }
            None => (0.0, 0.0, 0.0),
        };
        let won = calibration::classify_outcome(
            final_score.get(side),
            final_score.get(side.other()),
        );
        rows.push(HistoricalRow {
            features: StateFeatures {
                quarter: event.quarter as f64,
                down: event.down as f64,
                distance: event.distance as f64,
                yardline_100: (100 - event.yardline) as f64,
                seconds_remaining: game_seconds_remaining(event.quarter, event.clock_seconds) as f64,
                score_differential: pre.margin_for(side) as f64,
                possession_is_home: if side == Side::Home { 1.0 } else { 0.0 },
            },
            outcome: MetricsOutcome {
                win_prob: won.target(),
                expected_points: points,
                epa: event.epa,
                td_prob: td,
                fg_prob: fg,
                safety_prob: 0.0,
                no_score_prob: 1.0 - td - fg,
            },
        });
    }
    rows.reverse();
    rows
}

fn is_scrimmage(tag: PlayTag) -> bool {
    matches!(
        tag,
        PlayTag::Run
            | PlayTag::Pass
            | PlayTag::Scramble
            | PlayTag::Sack
            | PlayTag::Kneel
            | PlayTag::FourthDownTry
            | PlayTag::FieldGoal
            | PlayTag::Punt
    )
}

fn game_seconds_remaining(quarter: u8, clock_seconds: u32) -> u32 {
    let later = 4u32.saturating_sub(quarter as u32) * QUARTER_SECONDS;
    (later + clock_seconds).min(GAME_SECONDS)
}

fn print_scoring(home: &TeamRatings, away: &TeamRatings, reports: &[GameReport]) {
    let n = reports.len() as f64;
    let home_pts: f64 = reports.iter().map(|r| r.score.home as f64).sum::<f64>() / n;
    let away_pts: f64 = reports.iter().map(|r| r.score.away as f64).sum::<f64>() / n;
    let plays: f64 = reports.iter().map(|r| r.plays as f64).sum::<f64>() / n;
    let drives: f64 = reports.iter().map(|r| r.drives as f64).sum::<f64>() / n;
    let home_wins = reports.iter().filter(|r| r.score.home > r.score.away).count();
    let ties = reports.iter().filter(|r| r.score.home == r.score.away).count();

    println!("games={}  {} (home) vs {} (away)", reports.len(), home.abbr, away.abbr);
    println!(
        "avg points {:.1}-{:.1}  avg plays {:.1}  avg drives {:.1}",
        home_pts, away_pts, plays, drives
    );
    println!(
        "home wins {} ({:.1}%)  ties {}",
        home_wins,
        home_wins as f64 / n * 100.0,
        ties
    );
    if let Some(blowout) = reports
        .iter()
        .max_by_key(|r| r.score.home.abs_diff(r.score.away))
    {
        println!(
            "widest margin: seed {} ({}-{})",
            blowout.seed, blowout.score.home, blowout.score.away
        );
    }
}

fn print_calibration(reports: &[GameReport], bins: usize) {
    let mut preds = Vec::new();
    let mut outcomes = Vec::new();
    for report in reports {
        let outcome = calibration::classify_outcome(report.score.home, report.score.away);
        preds.extend(report.wp_path.iter().copied());
        outcomes.extend(std::iter::repeat_n(outcome, report.wp_path.len()));
    }

    let raw = calibration::evaluate(&preds, &outcomes);
    let (scale, fitted) = calibration::fit_logit_scale(&preds, &outcomes);
    println!();
    println!("WP calibration over {} snaps", raw.samples);
    println!(
        "  raw     brier {:.4}  log_loss {:.4}  acc {:.3}",
        raw.brier, raw.log_loss, raw.accuracy
    );
    println!(
        "  scaled  brier {:.4}  log_loss {:.4}  acc {:.3}  (logit scale {:.2})",
        fitted.brier, fitted.log_loss, fitted.accuracy, scale
    );
    for bin in calibration::calibration_bins(&preds, &outcomes, bins) {
        if bin.count == 0 {
            continue;
        }
        println!(
            "  [{:.2}, {:.2})  n={:<6} pred {:.3}  actual {:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }
    let home_wins = outcomes.iter().filter(|o| **o == GameOutcome::HomeWin).count();
    tracing::debug!(snaps = outcomes.len(), home_wins, "calibration sample");
}

fn build_pool() -> Option<rayon::ThreadPool> {
    let threads = std::env::var("SIM_THREADS")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())?
        .clamp(1, 64);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .ok()
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&format!("{name}="))
            && !v.trim().is_empty()
        {
            return Some(PathBuf::from(v.trim()));
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.starts_with("--")
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_u64_arg(name).map(|v| v as usize)
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<u64>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<u64>()
        {
            return Some(v);
        }
    }
    None
}
