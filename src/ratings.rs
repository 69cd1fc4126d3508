use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::state::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    QB,
    RB,
    FB,
    WR,
    TE,
    K,
    P,
    DL,
    LB,
    DB,
}

impl Position {
    pub fn is_defense(self) -> bool {
        matches!(self, Position::DL | Position::LB | Position::DB)
    }
}

/// Positional skill attributes on a 0-100 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRatings {
    pub name: String,
    pub position: Position,
    /// Depth-chart order within the position, 1 = starter.
    #[serde(default = "default_depth")]
    pub depth: u8,
    #[serde(default = "default_attr")]
    pub speed: f64,
    #[serde(default = "default_attr")]
    pub power: f64,
    #[serde(default = "default_attr")]
    pub hands: f64,
    #[serde(default = "default_attr")]
    pub accuracy: f64,
    #[serde(default = "default_attr")]
    pub kicking: f64,
    #[serde(default = "default_attr")]
    pub pass_rush: f64,
    #[serde(default = "default_attr")]
    pub coverage: f64,
}

fn default_depth() -> u8 {
    1
}

fn default_attr() -> f64 {
    60.0
}

impl PlayerRatings {
    pub fn new(name: &str, position: Position, depth: u8) -> Self {
        Self {
            name: name.to_string(),
            position,
            depth,
            speed: default_attr(),
            power: default_attr(),
            hands: default_attr(),
            accuracy: default_attr(),
            kicking: default_attr(),
            pass_rush: default_attr(),
            coverage: default_attr(),
        }
    }

    fn with(mut self, f: impl FnOnce(&mut PlayerRatings)) -> Self {
        f(&mut self);
        self
    }
}

/// Team strength aggregates plus the roster the engine draws players from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRatings {
    pub name: String,
    pub abbr: String,
    pub offense: f64,
    pub defense: f64,
    pub special: f64,
    pub roster: Vec<PlayerRatings>,
}

impl TeamRatings {
    /// Checks the roster can field every unit the engine needs.
    pub fn validate(&self) -> Result<(), SimError> {
        for (label, value) in [
            ("offense", self.offense),
            ("defense", self.defense),
            ("special", self.special),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(SimError::data(format!(
                    "{}: {label} rating {value} outside 0..=100",
                    self.abbr
                )));
            }
        }
        for pos in [Position::QB, Position::RB, Position::WR, Position::K, Position::P] {
            if self.starter(pos).is_none() {
                return Err(SimError::data(format!("{}: roster has no {pos:?}", self.abbr)));
            }
        }
        if !self.roster.iter().any(|p| p.position.is_defense()) {
            return Err(SimError::data(format!("{}: roster has no defenders", self.abbr)));
        }
        Ok(())
    }

    /// Roster index of the `depth`-th player at `pos` (1-based), if any.
    pub fn at_depth(&self, pos: Position, depth: u8) -> Option<usize> {
        let mut players: Vec<usize> = self
            .roster
            .iter()
            .enumerate()
            .filter(|(_, p)| p.position == pos)
            .map(|(i, _)| i)
            .collect();
        players.sort_by_key(|i| self.roster[*i].depth);
        players.get(depth.saturating_sub(1) as usize).copied()
    }

    pub fn starter(&self, pos: Position) -> Option<usize> {
        self.at_depth(pos, 1)
    }

    pub fn player(&self, idx: usize) -> &PlayerRatings {
        &self.roster[idx]
    }

    pub fn defenders(&self) -> impl Iterator<Item = (usize, &PlayerRatings)> {
        self.roster
            .iter()
            .enumerate()
            .filter(|(_, p)| p.position.is_defense())
    }

    /// Single power number used for the pre-game prior.
    pub fn power(&self) -> f64 {
        0.45 * self.offense + 0.40 * self.defense + 0.15 * self.special
    }
}

/// The two teams of one game.
#[derive(Debug, Clone, Copy)]
pub struct Matchup<'a> {
    pub home: &'a TeamRatings,
    pub away: &'a TeamRatings,
}

impl<'a> Matchup<'a> {
    pub fn new(home: &'a TeamRatings, away: &'a TeamRatings) -> Self {
        Self { home, away }
    }

    pub fn team(&self, side: Side) -> &'a TeamRatings {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }
}

pub fn load_teams(path: &Path) -> Result<(TeamRatings, TeamRatings)> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read teams file {}", path.display()))?;
    let teams: Vec<TeamRatings> = serde_json::from_str(&raw).context("parse teams json")?;
    let mut iter = teams.into_iter();
    let home = iter.next().context("teams file needs a home team")?;
    let away = iter.next().context("teams file needs an away team")?;
    Ok((home, away))
}

/// A complete roster around the given strength numbers, for demos and tests.
pub fn demo_team(name: &str, abbr: &str, offense: f64, defense: f64, special: f64) -> TeamRatings {
    let lift = (offense - 60.0) * 0.5;
    let stop = (defense - 60.0) * 0.5;
    let boot = (special - 60.0) * 0.5;
    let mut roster = vec![
        PlayerRatings::new(&format!("{abbr} QB1"), Position::QB, 1).with(|p| {
            p.accuracy = 72.0 + lift;
            p.speed = 62.0;
        }),
        PlayerRatings::new(&format!("{abbr} QB2"), Position::QB, 2).with(|p| p.accuracy = 60.0),
        PlayerRatings::new(&format!("{abbr} RB1"), Position::RB, 1).with(|p| {
            p.speed = 78.0 + lift;
            p.power = 70.0;
        }),
        PlayerRatings::new(&format!("{abbr} RB2"), Position::RB, 2).with(|p| p.speed = 70.0),
        PlayerRatings::new(&format!("{abbr} RB3"), Position::RB, 3),
        PlayerRatings::new(&format!("{abbr} FB"), Position::FB, 1).with(|p| p.power = 78.0),
        PlayerRatings::new(&format!("{abbr} WR1"), Position::WR, 1).with(|p| {
            p.speed = 84.0 + lift;
            p.hands = 76.0;
        }),
        PlayerRatings::new(&format!("{abbr} WR2"), Position::WR, 2).with(|p| {
            p.speed = 78.0;
            p.hands = 70.0;
        }),
        PlayerRatings::new(&format!("{abbr} WR3"), Position::WR, 3).with(|p| p.speed = 74.0),
        PlayerRatings::new(&format!("{abbr} TE"), Position::TE, 1).with(|p| {
            p.hands = 70.0;
            p.power = 72.0;
        }),
        PlayerRatings::new(&format!("{abbr} K"), Position::K, 1).with(|p| p.kicking = 75.0 + boot),
        PlayerRatings::new(&format!("{abbr} P"), Position::P, 1).with(|p| p.kicking = 70.0 + boot),
    ];
    for i in 1..=4u8 {
        roster.push(
            PlayerRatings::new(&format!("{abbr} DL{i}"), Position::DL, i)
                .with(|p| p.pass_rush = 68.0 + stop),
        );
    }
    for i in 1..=3u8 {
        roster.push(PlayerRatings::new(&format!("{abbr} LB{i}"), Position::LB, i).with(|p| {
            p.pass_rush = 60.0 + stop;
            p.coverage = 60.0;
        }));
    }
    for i in 1..=4u8 {
        roster.push(
            PlayerRatings::new(&format!("{abbr} DB{i}"), Position::DB, i)
                .with(|p| p.coverage = 68.0 + stop),
        );
    }
    TeamRatings {
        name: name.to_string(),
        abbr: abbr.to_string(),
        offense,
        defense,
        special,
        roster,
    }
}

pub fn demo_matchup() -> (TeamRatings, TeamRatings) {
    (
        demo_team("Harbor City Mariners", "HCM", 66.0, 62.0, 58.0),
        demo_team("Prairie Thunder", "PRT", 61.0, 64.0, 63.0),
    )
}
