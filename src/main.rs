use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use gridiron_sim::config::SimConfig;
use gridiron_sim::export::{self, GameArtifact};
use gridiron_sim::historical_dataset;
use gridiron_sim::knn::MetricsHandle;
use gridiron_sim::ratings::{self, TeamRatings};
use gridiron_sim::runner::{self, Delta, SimCommand};
use gridiron_sim::state::{Drive, PlayEvent, Side};
use gridiron_sim::Simulation;

/// How long the harness waits for the estimator before kicking off.
const ESTIMATOR_WAIT: Duration = Duration::from_millis(1500);

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(true)
        .init();

    let mut config = match parse_path_arg("--config") {
        Some(path) => SimConfig::from_file(&path)?,
        None => SimConfig::from_env(),
    };
    if let Some(seed) = parse_u64_arg("--seed") {
        config.seed = Some(seed);
    }
    if let Some(delay) = parse_u64_arg("--delay-ms") {
        config.tick_delay_ms = delay;
    }
    let paced = has_flag("--paced") || config.tick_delay_ms > 0;

    let (home, away) = match parse_path_arg("--teams") {
        Some(path) => ratings::load_teams(&path)?,
        None => ratings::demo_matchup(),
    };

    let metrics = MetricsHandle::new();
    let db_path = parse_path_arg("--metrics-db").or_else(historical_dataset::default_db_path);
    if let Some(path) = db_path.filter(|p| p.exists()) {
        let loader = historical_dataset::spawn_background_load(metrics.clone(), path);
        wait_for_estimator(&metrics, &loader);
    }

    let sim = Simulation::new(home, away, config, &metrics)?;
    println!(
        "{} at {}  seed={}  pregame home WP {:.1}%  estimator={}",
        sim.away().name,
        sim.home().name,
        sim.seed(),
        sim.prior() * 100.0,
        if sim.uses_estimator() { "knn" } else { "closed-form" }
    );

    let sim = if paced { run_paced(sim)? } else { run_direct(sim)? };

    print_drives(&sim);
    print_scoring(&sim);
    print_box_score(&sim, Side::Away, sim.away());
    print_box_score(&sim, Side::Home, sim.home());

    if let Some(path) = parse_path_arg("--export") {
        export::save_artifact(&GameArtifact::from_simulation(&sim), &path)?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn wait_for_estimator(metrics: &MetricsHandle, loader: &std::thread::JoinHandle<()>) {
    let deadline = std::time::Instant::now() + ESTIMATOR_WAIT;
    while !metrics.is_ready() && !loader.is_finished() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn run_direct(mut sim: Simulation) -> Result<Simulation> {
    sim.run_to_completion()?;
    for event in sim.events() {
        print_event(event, &sim);
    }
    Ok(sim)
}

fn run_paced(sim: Simulation) -> Result<Simulation> {
    let home_abbr = sim.home().abbr.clone();
    let away_abbr = sim.away().abbr.clone();
    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let handle = runner::spawn_paced_runner(sim, tx, cmd_rx);

    for delta in rx.iter() {
        match delta {
            Delta::Event(event) => println!("{}", format_event(&event, &home_abbr, &away_abbr)),
            Delta::DriveClosed(drive) => {
                tracing::debug!(team = drive.team.label(), result = ?drive.result, "drive closed");
            }
            Delta::Finished(_) => break,
            Delta::Log(line) => eprintln!("{line}"),
            Delta::Tick { .. } | Delta::Paused | Delta::Resumed | Delta::Reset => {}
        }
    }
    let _ = cmd_tx.send(SimCommand::Stop);
    handle.join().map_err(|_| anyhow!("paced runner panicked"))
}

fn print_event(event: &PlayEvent, sim: &Simulation) {
    println!("{}", format_event(event, &sim.home().abbr, &sim.away().abbr));
}

fn format_event(event: &PlayEvent, home: &str, away: &str) -> String {
    let clock = format!(
        "Q{} {:>2}:{:02}",
        event.quarter,
        event.clock_seconds / 60,
        event.clock_seconds % 60
    );
    let offense = match event.offense {
        Side::Home => home,
        Side::Away => away,
    };
    if event.tag.is_administrative() {
        return format!("{clock}  --  {}", event.description);
    }
    format!(
        "{clock}  {offense:<4} {}&{:<2} @{:>2}  {:<60}  {:>2}-{:<2}  EPA {:+.2}  WP {:>5.1}%",
        event.down,
        event.distance,
        event.yardline,
        event.description,
        event.score.away,
        event.score.home,
        event.epa,
        event.home_wp * 100.0
    )
}

fn print_drives(sim: &Simulation) {
    println!();
    println!("DRIVES");
    for drive in sim.drives() {
        print_drive(drive, sim);
    }
}

fn print_drive(drive: &Drive, sim: &Simulation) {
    let team = match drive.team {
        Side::Home => &sim.home().abbr,
        Side::Away => &sim.away().abbr,
    };
    let result = drive
        .result
        .map(|r| format!("{r:?}"))
        .unwrap_or_else(|| "open".to_string());
    println!(
        "  {team:<4} Q{} {:>2}:{:02}  start {:>2}  plays {:>2}  yards {:>3}  {:<16} pts {}  EPA {:+.2}",
        drive.start_quarter,
        drive.start_clock / 60,
        drive.start_clock % 60,
        drive.start_yardline,
        drive.plays,
        drive.yards,
        result,
        drive.points,
        drive.drive_epa
    );
}

fn print_scoring(sim: &Simulation) {
    let state = sim.state();
    println!();
    println!("SCORING");
    for play in &state.scoring {
        let team = match play.side {
            Side::Home => &sim.home().abbr,
            Side::Away => &sim.away().abbr,
        };
        let pat = play
            .pat
            .map(|p| format!(" ({:?} {})", p.kind, if p.good { "good" } else { "no good" }))
            .unwrap_or_default();
        println!(
            "  Q{} {:>2}:{:02}  {team:<4} {}{pat}",
            play.quarter,
            play.clock_seconds / 60,
            play.clock_seconds % 60,
            play.description
        );
    }
    println!(
        "FINAL  {} {}  {} {}",
        sim.away().abbr,
        state.score.away,
        sim.home().abbr,
        state.score.home
    );
}

fn print_box_score(sim: &Simulation, side: Side, team: &TeamRatings) {
    let box_score = &sim.state().box_score;
    println!();
    println!("{} ({})", team.name, team.abbr);
    for (idx, player) in team.roster.iter().enumerate() {
        let line = box_score.line(side, idx);
        let mut parts = Vec::new();
        if line.pass_att > 0 {
            parts.push(format!(
                "{}/{} {} yds {} td {} int",
                line.completions,
                line.pass_att,
                line.pass_yards,
                line.pass_td,
                line.interceptions_thrown
            ));
        }
        if line.carries > 0 {
            parts.push(format!("{} car {} yds {} td", line.carries, line.rush_yards, line.rush_td));
        }
        if line.targets > 0 {
            parts.push(format!(
                "{}/{} rec {} yds {} td",
                line.receptions, line.targets, line.rec_yards, line.rec_td
            ));
        }
        if line.tackles + line.sacks + line.interceptions > 0 {
            parts.push(format!(
                "{} tkl {} sk {} int",
                line.tackles, line.sacks, line.interceptions
            ));
        }
        if line.fg_att + line.xp_att > 0 {
            parts.push(format!(
                "FG {}/{} XP {}/{}",
                line.fg_made, line.fg_att, line.xp_made, line.xp_att
            ));
        }
        if line.punts > 0 {
            parts.push(format!("{} punts {} yds", line.punts, line.punt_yards));
        }
        if line.returns > 0 {
            parts.push(format!("{} ret {} yds", line.returns, line.return_yards));
        }
        if !parts.is_empty() {
            println!("  {:<22} {:?}  {}", player.name, player.position, parts.join(", "));
        }
    }
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|a| a == name)
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
