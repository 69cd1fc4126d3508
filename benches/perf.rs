use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use gridiron_sim::Simulation;
use gridiron_sim::config::SimConfig;
use gridiron_sim::drive_ep::drive_ep;
use gridiron_sim::expected_points::expected_points;
use gridiron_sim::knn::{HistoricalRow, MetricsModel, MetricsOutcome, StateFeatures};
use gridiron_sim::models::Models;
use gridiron_sim::ratings::{Matchup, demo_matchup};
use gridiron_sim::state::{GameState, Score, Side, Situation};
use gridiron_sim::win_prob::win_probability_for_state;

fn midfield_state() -> GameState {
    GameState::at(
        Situation {
            quarter: 3,
            clock_seconds: 412,
            down: 3,
            distance: 6,
            yardline: 52,
            possession: Side::Home,
        },
        Score { home: 17, away: 13 },
    )
}

fn synthetic_rows(n: usize) -> Vec<HistoricalRow> {
    (0..n)
        .map(|i| {
            let f = i as f64;
            HistoricalRow {
                features: StateFeatures {
                    quarter: (i % 4 + 1) as f64,
                    down: (i % 4 + 1) as f64,
                    distance: (i % 15 + 1) as f64,
                    yardline_100: (i % 99 + 1) as f64,
                    seconds_remaining: (i * 37 % 3600) as f64,
                    score_differential: (i % 29) as f64 - 14.0,
                    possession_is_home: (i % 2) as f64,
                },
                outcome: MetricsOutcome {
                    win_prob: (f * 0.618).fract(),
                    expected_points: (f * 0.414).fract() * 7.0 - 1.0,
                    epa: 0.0,
                    td_prob: 0.2,
                    fg_prob: 0.15,
                    safety_prob: 0.01,
                    no_score_prob: 0.64,
                },
            }
        })
        .collect()
}

fn bench_expected_points(c: &mut Criterion) {
    c.bench_function("expected_points", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for yardline in 1..100 {
                acc += expected_points(black_box(1), black_box(10.0), yardline as f64);
            }
            black_box(acc);
        })
    });
}

fn bench_drive_ep(c: &mut Criterion) {
    let (home, away) = demo_matchup();
    let config = SimConfig::default();
    let models = Models::closed_form(&config);
    let matchup = Matchup::new(&home, &away);
    let state = midfield_state();
    c.bench_function("drive_ep_closed_form", |b| {
        b.iter(|| black_box(drive_ep(black_box(&state), &matchup, &models)))
    });
}

fn bench_win_probability(c: &mut Criterion) {
    let config = SimConfig::default();
    let models = Models::closed_form(&config);
    let state = midfield_state();
    c.bench_function("win_probability_closed_form", |b| {
        b.iter(|| black_box(win_probability_for_state(black_box(&state), 0.55, &models)))
    });
}

fn bench_knn_query(c: &mut Criterion) {
    let model = MetricsModel::initialize(synthetic_rows(20_000)).unwrap();
    let query = StateFeatures {
        quarter: 4.0,
        down: 2.0,
        distance: 7.0,
        yardline_100: 35.0,
        seconds_remaining: 240.0,
        score_differential: -3.0,
        possession_is_home: 1.0,
    };
    c.bench_function("knn_query_20k_k200", |b| {
        b.iter(|| black_box(model.estimate(black_box(&query), 200)))
    });
}

fn bench_full_game(c: &mut Criterion) {
    let (home, away) = demo_matchup();
    c.bench_function("full_game_closed_form", |b| {
        b.iter(|| {
            let cfg = SimConfig {
                seed: Some(black_box(11)),
                ..SimConfig::default()
            };
            let mut sim = Simulation::with_model(home.clone(), away.clone(), cfg, None).unwrap();
            sim.run_to_completion().unwrap();
            black_box(sim.state().score);
        })
    });
}

criterion_group!(
    perf,
    bench_expected_points,
    bench_drive_ep,
    bench_win_probability,
    bench_knn_query,
    bench_full_game
);
criterion_main!(perf);
