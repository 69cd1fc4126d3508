use gridiron_sim::SimError;
use gridiron_sim::clock::{self, ClockContext};
use gridiron_sim::config::SimConfig;
use gridiron_sim::drive_ep::{FourthDownCall, fourth_down_call};
use gridiron_sim::expected_points::{EP_MAX, EP_MIN, expected_points};
use gridiron_sim::historical_dataset;
use gridiron_sim::knn::{HistoricalRow, MetricsHandle, MetricsModel, MetricsOutcome, StateFeatures};
use gridiron_sim::models::Models;
use gridiron_sim::ratings::{Matchup, demo_matchup};
use gridiron_sim::state::{GameState, Score, Side, Situation};
use gridiron_sim::win_prob::{WP_MAX, WP_MIN, WpInput, win_probability, win_probability_for_state};

fn situation(quarter: u8, clock_seconds: u32, down: u8, distance: i32, yardline: i32) -> Situation {
    Situation {
        quarter,
        clock_seconds,
        down,
        distance,
        yardline,
        possession: Side::Home,
    }
}

fn wp_input(home: u32, away: u32, quarter: u8, clock: u32) -> WpInput {
    WpInput {
        home_score: home,
        away_score: away,
        quarter,
        clock_seconds: clock,
        down: 1,
        distance: 10,
        yardline: 50,
        possession: Side::Home,
        home_timeouts: 3,
        away_timeouts: 3,
        prior: 0.5,
    }
}

#[test]
fn ep_is_bounded_and_monotone() {
    for down in 1..=4u8 {
        for yardline in 1..100 {
            let mut last = f64::INFINITY;
            for distance in 1..=25 {
                let ep = expected_points(down, distance as f64, yardline as f64);
                assert!((EP_MIN..=EP_MAX).contains(&ep), "ep {ep} at {down}&{distance} @{yardline}");
                assert!(ep <= last + 1e-12, "distance monotonicity at {down}&{distance} @{yardline}");
                last = ep;
            }
        }
        for distance in [1.0, 5.0, 10.0, 20.0] {
            let mut last = f64::NEG_INFINITY;
            for yardline in 1..100 {
                let ep = expected_points(down, distance, yardline as f64);
                assert!(ep >= last - 1e-12, "yardline monotonicity at {down}&{distance} @{yardline}");
                last = ep;
            }
        }
    }
}

#[test]
fn wp_is_bounded_and_monotone_in_margin() {
    let cfg = SimConfig::default();
    let models = Models::closed_form(&cfg);
    let clocks = [(1, 900), (2, 300), (3, 600), (4, 400), (4, 45), (4, 30), (4, 10), (4, 1)];
    for (quarter, clock) in clocks {
        for possession in [Side::Home, Side::Away] {
            for timeouts in [0, 1, 3] {
                let mut last = 0.0;
                for home in 0..=60u32 {
                    let mut input = wp_input(home, 30, quarter, clock);
                    input.possession = possession;
                    input.home_timeouts = timeouts;
                    input.away_timeouts = timeouts;
                    let wp = win_probability(&input, &models);
                    assert!((WP_MIN..=WP_MAX).contains(&wp));
                    assert!(
                        wp >= last - 1e-12,
                        "margin {} in Q{quarter} {clock}s, {possession:?} ball, {timeouts} timeouts: {last} -> {wp}",
                        home as i32 - 30
                    );
                    last = wp;
                }
            }
        }
    }
}

#[test]
fn three_score_lead_with_ten_seconds_is_decided() {
    let cfg = SimConfig::default();
    let models = Models::closed_form(&cfg);
    let up = win_probability(&wp_input(31, 6, 4, 10), &models);
    let down = win_probability(&wp_input(6, 31, 4, 10), &models);
    assert!(up >= 0.9995, "wp {up}");
    assert!(down <= 0.0005, "wp {down}");
}

#[test]
fn big_late_lead_with_the_ball_is_near_certain() {
    let cfg = SimConfig::default();
    let models = Models::closed_form(&cfg);
    let state = GameState::at(situation(4, 30, 1, 10, 75), Score { home: 24, away: 3 });
    let wp = win_probability_for_state(&state, 0.5, &models);
    assert!(wp >= 0.999, "wp {wp}");
}

#[test]
fn trailing_by_seven_at_the_three_goes_for_it() {
    let (home, away) = demo_matchup();
    let cfg = SimConfig::default();
    let state = GameState::at(situation(4, 200, 4, 1, 97), Score { home: 10, away: 17 });
    let call = fourth_down_call(&state, &Matchup::new(&home, &away), &cfg);
    assert_eq!(call, FourthDownCall::GoForIt);
}

#[test]
fn two_minute_warning_fires_once_per_half() {
    let cfg = SimConfig::default();
    let mut state = GameState::at(situation(2, 130, 1, 10, 40), Score::default());

    let report = clock::apply_clock(&mut state, 900, ClockContext::running(0), &cfg);
    assert!(report.two_minute_warning);
    assert_eq!(state.situation.clock_seconds, 120);

    state.situation.clock_seconds = 130;
    let report = clock::apply_clock(&mut state, 900, ClockContext::running(0), &cfg);
    assert!(!report.two_minute_warning);
    assert_eq!(state.situation.clock_seconds, 0);

    let mut second_half = GameState::at(situation(4, 130, 1, 10, 40), Score::default());
    second_half.two_minute_warning_given = state.two_minute_warning_given;
    let report = clock::apply_clock(&mut second_half, 900, ClockContext::running(0), &cfg);
    assert!(report.two_minute_warning);
    assert_eq!(second_half.situation.clock_seconds, 120);
}

#[test]
fn timeouts_respect_the_gap_and_never_go_negative() {
    let mut state = GameState::at(situation(3, 500, 2, 6, 35), Score::default());
    assert!(clock::call_timeout(&mut state, Side::Away, 14));
    state.situation.clock_seconds = 490;
    assert!(!clock::call_timeout(&mut state, Side::Away, 14));
    assert_eq!(state.timeouts.away, 2);

    state.situation.clock_seconds = 470;
    assert!(clock::call_timeout(&mut state, Side::Away, 14));
    state.situation.clock_seconds = 440;
    assert!(clock::call_timeout(&mut state, Side::Away, 14));
    state.situation.clock_seconds = 400;
    assert!(!clock::call_timeout(&mut state, Side::Away, 14));
    assert_eq!(state.timeouts.away, 0);
    assert_eq!(state.timeouts.home, 3);
}

fn stored_row(quarter: f64, yardline_100: f64, wp: f64, ep: f64) -> HistoricalRow {
    HistoricalRow {
        features: StateFeatures {
            quarter,
            down: 1.0,
            distance: 10.0,
            yardline_100,
            seconds_remaining: (4.0 - quarter) * 900.0 + 450.0,
            score_differential: 0.0,
            possession_is_home: 1.0,
        },
        outcome: MetricsOutcome {
            win_prob: wp,
            expected_points: ep,
            epa: 0.25,
            td_prob: 0.3,
            fg_prob: 0.2,
            safety_prob: 0.01,
            no_score_prob: 0.49,
        },
    }
}

#[test]
fn nearest_neighbor_of_a_stored_row_is_itself() {
    let rows = vec![
        stored_row(1.0, 75.0, 0.51, 0.9),
        stored_row(2.0, 40.0, 0.58, 2.7),
        stored_row(4.0, 10.0, 0.83, 5.1),
    ];
    let target = rows[1];
    let model = MetricsModel::initialize(rows).unwrap();
    let out = model.estimate(&target.features, 1);
    assert_eq!(out.win_prob, target.outcome.win_prob);
    assert_eq!(out.expected_points, target.outcome.expected_points);
    assert_eq!(out.epa, target.outcome.epa);
}

#[test]
fn estimator_is_not_ready_until_installed() {
    let handle = MetricsHandle::new();
    let query = stored_row(1.0, 75.0, 0.5, 1.0).features;
    assert!(matches!(handle.estimate(&query, 5), Err(SimError::NotReady(_))));

    let model = MetricsModel::initialize(vec![stored_row(1.0, 75.0, 0.5, 1.0)]).unwrap();
    assert!(handle.clone().install(model));
    assert!(handle.is_ready());
    assert!(handle.estimate(&query, 5).is_ok());
}

#[test]
fn loader_rejects_missing_columns_and_unusable_tables() {
    let missing = r#"[{"quarter": 1, "down": 1, "distance": 10}]"#;
    let err = historical_dataset::rows_from_json(missing).unwrap_err();
    assert!(matches!(err.downcast_ref::<SimError>(), Some(SimError::DataError(_))));

    let dir = std::env::temp_dir().join(format!("gridiron_sim_loader_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("all_null.json");
    std::fs::write(
        &path,
        r#"[{"qtr": 1, "down": 1, "ydstogo": 10, "yardline_100": 75,
             "game_seconds_remaining": 3600, "score_differential": 0, "posteam_is_home": 1,
             "wp": null, "ep": null, "epa": null, "td_prob": null, "fg_prob": null,
             "safety_prob": null, "no_score_prob": null}]"#,
    )
    .unwrap();
    let err = historical_dataset::load_model(&path).unwrap_err();
    assert!(matches!(err.downcast_ref::<SimError>(), Some(SimError::DataError(_))));
    let _ = std::fs::remove_dir_all(&dir);
}
