use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ratings::{Position, TeamRatings};
use crate::sim::Simulation;
use crate::state::{Drive, PlayEvent, PlayerLine, ScoringPlay, Side};

pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub name: String,
    pub position: Position,
    #[serde(flatten)]
    pub line: PlayerLine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSummary {
    pub name: String,
    pub abbr: String,
    pub points: u32,
    pub players: Vec<PlayerSummary>,
}

/// Everything a finished (or stopped) game produced, as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameArtifact {
    pub version: u32,
    pub generated_at: String,
    pub seed: u64,
    pub estimator: bool,
    pub prior_home_wp: f64,
    pub final_home_wp: f64,
    pub home: TeamSummary,
    pub away: TeamSummary,
    pub events: Vec<PlayEvent>,
    pub drives: Vec<Drive>,
    pub scoring: Vec<ScoringPlay>,
}

impl GameArtifact {
    pub fn from_simulation(sim: &Simulation) -> Self {
        let state = sim.state();
        Self {
            version: ARTIFACT_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            seed: sim.seed(),
            estimator: sim.uses_estimator(),
            prior_home_wp: sim.prior(),
            final_home_wp: sim.home_win_probability(),
            home: team_summary(sim, Side::Home, sim.home()),
            away: team_summary(sim, Side::Away, sim.away()),
            events: state.events.clone(),
            drives: state.drives.clone(),
            scoring: state.scoring.clone(),
        }
    }
}

/// Players with at least one counted stat, in roster order.
fn team_summary(sim: &Simulation, side: Side, team: &TeamRatings) -> TeamSummary {
    let box_score = &sim.state().box_score;
    let players = team
        .roster
        .iter()
        .enumerate()
        .filter_map(|(idx, p)| {
            let line = box_score.line(side, idx);
            (line != PlayerLine::default()).then(|| PlayerSummary {
                name: p.name.clone(),
                position: p.position,
                line,
            })
        })
        .collect();
    TeamSummary {
        name: team.name.clone(),
        abbr: team.abbr.clone(),
        points: sim.state().score.get(side),
        players,
    }
}

pub fn save_artifact(artifact: &GameArtifact, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(artifact).context("serialize game artifact")?;
    fs::write(&tmp, json).context("write game artifact")?;
    fs::rename(&tmp, path).context("swap game artifact")?;
    Ok(())
}

pub fn load_artifact(path: &Path) -> Result<GameArtifact> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read game artifact {}", path.display()))?;
    serde_json::from_str(&raw).context("parse game artifact")
}
