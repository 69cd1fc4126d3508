use gridiron_sim::Simulation;
use gridiron_sim::config::SimConfig;
use gridiron_sim::play::TickOutcome;
use gridiron_sim::ratings::demo_matchup;
use gridiron_sim::special_teams::onside_success_probability;
use gridiron_sim::state::{PlayTag, Side};

fn seeded(seed: u64) -> Simulation {
    let (home, away) = demo_matchup();
    let cfg = SimConfig {
        seed: Some(seed),
        ..SimConfig::default()
    };
    Simulation::with_model(home, away, cfg, None).unwrap()
}

#[test]
fn drive_ledger_accounts_for_every_point() {
    for seed in [1, 2, 3, 17, 99] {
        let mut sim = seeded(seed);
        sim.run_to_completion().unwrap();
        let state = sim.state();

        assert!(sim.drives().iter().all(|d| d.is_closed()));
        let points: u32 = sim.drives().iter().map(|d| d.points).sum();
        assert_eq!(points, state.score.total(), "seed {seed}");

        let epa: f64 = sim.drives().iter().map(|d| d.drive_epa).sum();
        let start_ep: f64 = sim.drives().iter().map(|d| d.start_ep).sum();
        assert!(
            (epa - (state.score.total() as f64 - start_ep)).abs() < 1e-9,
            "seed {seed}"
        );

        for side in [Side::Home, Side::Away] {
            let by_side: u32 = sim
                .drives()
                .iter()
                .filter(|d| d.team == side)
                .map(|d| d.points)
                .sum();
            assert_eq!(by_side, state.score.get(side), "seed {seed}");
        }
    }
}

#[test]
fn every_play_tick_logs_exactly_one_play() {
    let mut sim = seeded(5);
    while !sim.is_final() {
        let before = sim.events().len();
        let outcome = sim.tick().unwrap();
        let plays = sim.events()[before..]
            .iter()
            .filter(|e| !e.tag.is_administrative())
            .count();
        match outcome {
            TickOutcome::Advanced | TickOutcome::Replay => assert_eq!(plays, 1),
            TickOutcome::QuarterEnded(_) | TickOutcome::Halftime | TickOutcome::Final => {
                assert_eq!(plays, 0)
            }
        }
    }
}

#[test]
fn penalties_replay_the_down() {
    let (home, away) = demo_matchup();
    let cfg = SimConfig {
        seed: Some(8),
        penalty_rate: 0.2,
        ..SimConfig::default()
    };
    let mut sim = Simulation::with_model(home, away, cfg, None).unwrap();
    let mut flags = 0;
    while !sim.is_final() {
        let down_before = sim.state().situation.down;
        let before = sim.events().len();
        if sim.tick().unwrap() == TickOutcome::Replay {
            flags += 1;
            let event = sim.events()[before..]
                .iter()
                .find(|e| e.tag == PlayTag::Penalty)
                .unwrap();
            assert_eq!(event.down, down_before);
            let after = sim.state().situation.down;
            assert!(after == down_before || after == 1, "flag consumed a down");
        }
    }
    assert!(flags > 0);
}

#[test]
fn same_seed_same_game() {
    let mut a = seeded(2024);
    let mut b = seeded(2024);
    a.run_to_completion().unwrap();
    b.run_to_completion().unwrap();
    assert_eq!(a.state().score, b.state().score);
    assert_eq!(a.events().len(), b.events().len());
    for (x, y) in a.events().iter().zip(b.events()) {
        assert_eq!(x.description, y.description);
        assert_eq!(x.epa.to_bits(), y.epa.to_bits());
        assert_eq!(x.home_wp.to_bits(), y.home_wp.to_bits());
    }
}

#[test]
fn game_state_stays_on_the_field() {
    for seed in 30..40 {
        let mut sim = seeded(seed);
        sim.run_to_completion().unwrap();
        for event in sim.events() {
            assert!((1..=4).contains(&event.quarter));
            assert!(event.clock_seconds <= 900);
            assert!((0.0..=1.0).contains(&event.home_wp));
            if !event.tag.is_administrative() {
                assert!((1..=99).contains(&event.yardline), "{event:?}");
                assert!(event.distance > 0);
            }
        }
        let last = sim.events().last().unwrap();
        assert_eq!(last.tag, PlayTag::Final);
    }
}

#[test]
fn onside_odds_are_bounded_for_any_matchup() {
    let (mut strong, mut weak) = demo_matchup();
    for (a, b) in [(100.0, 0.0), (0.0, 100.0), (50.0, 50.0)] {
        strong.special = a;
        weak.special = b;
        let p = onside_success_probability(&strong, &weak);
        assert!((0.08..=0.18).contains(&p), "p {p}");
    }
}
