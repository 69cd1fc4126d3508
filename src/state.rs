use serde::{Deserialize, Serialize};

use crate::error::SimError;

pub const QUARTER_SECONDS: u32 = 900;
pub const GAME_SECONDS: u32 = 3600;
pub const TIMEOUTS_PER_HALF: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::Home => 0,
            Side::Away => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Home => "Home",
            Side::Away => "Away",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn get(&self, side: Side) -> u32 {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }

    pub fn add(&mut self, side: Side, points: u32) {
        match side {
            Side::Home => self.home += points,
            Side::Away => self.away += points,
        }
    }

    /// Home minus away.
    pub fn home_margin(&self) -> i32 {
        self.home as i32 - self.away as i32
    }

    /// `side`'s score minus its opponent's.
    pub fn margin_for(&self, side: Side) -> i32 {
        match side {
            Side::Home => self.home_margin(),
            Side::Away => -self.home_margin(),
        }
    }

    pub fn total(&self) -> u32 {
        self.home + self.away
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Situation {
    pub quarter: u8,
    pub clock_seconds: u32,
    pub down: u8,
    pub distance: i32,
    /// Yards from the possessing team's own goal line.
    pub yardline: i32,
    pub possession: Side,
}

impl Situation {
    pub fn yards_to_goal(&self) -> i32 {
        100 - self.yardline
    }

    pub fn is_goal_to_go(&self) -> bool {
        self.distance >= self.yards_to_goal()
    }

    /// Seconds left in regulation.
    pub fn game_seconds_remaining(&self) -> u32 {
        let later_quarters = 4u32.saturating_sub(self.quarter as u32);
        later_quarters * QUARTER_SECONDS + self.clock_seconds.min(QUARTER_SECONDS)
    }

    pub fn half_index(&self) -> usize {
        if self.quarter <= 2 { 0 } else { 1 }
    }

    /// First-and-10 (or goal) for `side` at `yardline`.
    pub fn first_down(&mut self, side: Side, yardline: i32) {
        self.possession = side;
        self.yardline = yardline.clamp(1, 99);
        self.down = 1;
        self.distance = 10.min(self.yards_to_goal());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub home: u8,
    pub away: u8,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            home: TIMEOUTS_PER_HALF,
            away: TIMEOUTS_PER_HALF,
        }
    }
}

impl Timeouts {
    pub fn get(&self, side: Side) -> u8 {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }

    /// Spends one timeout; returns false (and changes nothing) on an empty bank.
    pub fn spend(&mut self, side: Side) -> bool {
        let bank = match side {
            Side::Home => &mut self.home,
            Side::Away => &mut self.away,
        };
        if *bank == 0 {
            return false;
        }
        *bank -= 1;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatKind {
    ExtraPoint,
    TwoPoint,
}

impl PatKind {
    pub fn points(self) -> u32 {
        match self {
            PatKind::ExtraPoint => 1,
            PatKind::TwoPoint => 2,
        }
    }
}

/// The single slot of work that must be resolved before the next snap.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PendingAction {
    #[default]
    None,
    Kickoff {
        kicking_side: Side,
        onside: bool,
    },
    Pat {
        side: Side,
        kind: PatKind,
        expected_points: f64,
        score_index: usize,
    },
}

impl PendingAction {
    pub fn is_none(&self) -> bool {
        matches!(self, PendingAction::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    Live,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveResult {
    Touchdown,
    FieldGoal,
    MissedFieldGoal,
    Punt,
    Interception,
    Fumble,
    Downs,
    EndOfHalf,
    EndOfGame,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drive {
    pub team: Side,
    pub start_quarter: u8,
    pub start_clock: u32,
    pub start_yardline: i32,
    pub start_ep: f64,
    pub plays: u32,
    pub yards: i32,
    pub result: Option<DriveResult>,
    pub end_yardline: i32,
    pub points: u32,
    pub drive_epa: f64,
}

impl Drive {
    pub fn is_closed(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayTag {
    Run,
    Pass,
    Scramble,
    Sack,
    Kneel,
    FourthDownTry,
    FieldGoal,
    Punt,
    Kickoff,
    OnsideKick,
    ExtraPoint,
    TwoPoint,
    Penalty,
    Timeout,
    TwoMinuteWarning,
    EndOfQuarter,
    Halftime,
    Final,
}

impl PlayTag {
    /// Administrative entries are logged alongside plays but are not plays.
    pub fn is_administrative(self) -> bool {
        matches!(
            self,
            PlayTag::Timeout
                | PlayTag::TwoMinuteWarning
                | PlayTag::EndOfQuarter
                | PlayTag::Halftime
                | PlayTag::Final
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayEvent {
    pub tag: PlayTag,
    pub description: String,
    pub offense: Side,
    pub is_scoring: bool,
    pub epa: f64,
    /// Change in home win probability, capped by game time.
    pub wpa: f64,
    pub drive_ep_at_snap: f64,
    pub quarter: u8,
    pub clock_seconds: u32,
    pub down: u8,
    pub distance: i32,
    pub yardline: i32,
    pub score: Score,
    pub home_wp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreKind {
    Touchdown,
    FieldGoal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatOutcome {
    pub kind: PatKind,
    pub good: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringPlay {
    pub quarter: u8,
    pub clock_seconds: u32,
    pub side: Side,
    pub kind: ScoreKind,
    pub points: u32,
    pub description: String,
    pub pat: Option<PatOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLine {
    pub carries: u32,
    pub rush_yards: i32,
    pub rush_td: u32,
    pub pass_att: u32,
    pub completions: u32,
    pub pass_yards: i32,
    pub pass_td: u32,
    pub interceptions_thrown: u32,
    pub sacks_taken: u32,
    pub targets: u32,
    pub receptions: u32,
    pub rec_yards: i32,
    pub rec_td: u32,
    pub fumbles_lost: u32,
    pub tackles: u32,
    pub sacks: u32,
    pub interceptions: u32,
    pub fg_att: u32,
    pub fg_made: u32,
    pub xp_att: u32,
    pub xp_made: u32,
    pub punts: u32,
    pub punt_yards: i32,
    pub returns: u32,
    pub return_yards: i32,
}

/// Per-game counters, parallel to each team's roster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoxScore {
    pub home: Vec<PlayerLine>,
    pub away: Vec<PlayerLine>,
}

impl BoxScore {
    pub fn new(home_roster: usize, away_roster: usize) -> Self {
        Self {
            home: vec![PlayerLine::default(); home_roster],
            away: vec![PlayerLine::default(); away_roster],
        }
    }

    pub fn line(&self, side: Side, idx: usize) -> PlayerLine {
        let lines = match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        };
        lines.get(idx).copied().unwrap_or_default()
    }

    /// Counters for roster slot `idx`, growing the table if needed.
    pub fn line_mut(&mut self, side: Side, idx: usize) -> &mut PlayerLine {
        let lines = match side {
            Side::Home => &mut self.home,
            Side::Away => &mut self.away,
        };
        if lines.len() <= idx {
            lines.resize(idx + 1, PlayerLine::default());
        }
        &mut lines[idx]
    }
}

/// Everything that changes during a game. Owned by the simulation loop and
/// mutated by exactly one tick at a time.
#[derive(Debug, Clone)]
pub struct GameState {
    pub score: Score,
    pub situation: Situation,
    pub timeouts: Timeouts,
    pub pending: PendingAction,
    pub phase: GamePhase,
    pub opening_receiver: Side,
    pub two_minute_warning_given: [bool; 2],
    /// Game seconds remaining when each side last called a timeout.
    pub last_timeout_at: [Option<u32>; 2],
    pub penalty_cooldown: bool,
    pub drives: Vec<Drive>,
    pub events: Vec<PlayEvent>,
    pub scoring: Vec<ScoringPlay>,
    pub box_score: BoxScore,
    pub ticks: u64,
}

impl GameState {
    /// A game waiting on its opening kickoff.
    pub fn new(opening_receiver: Side, home_roster: usize, away_roster: usize) -> Self {
        let kicking_side = opening_receiver.other();
        Self {
            score: Score::default(),
            situation: Situation {
                quarter: 1,
                clock_seconds: QUARTER_SECONDS,
                down: 1,
                distance: 10,
                yardline: 25,
                possession: opening_receiver,
            },
            timeouts: Timeouts::default(),
            pending: PendingAction::Kickoff {
                kicking_side,
                onside: false,
            },
            phase: GamePhase::Live,
            opening_receiver,
            two_minute_warning_given: [false; 2],
            last_timeout_at: [None; 2],
            penalty_cooldown: false,
            drives: Vec::new(),
            events: Vec::new(),
            scoring: Vec::new(),
            box_score: BoxScore::new(home_roster, away_roster),
            ticks: 0,
        }
    }

    /// A live snap situation with no pending action, for what-if queries.
    pub fn at(situation: Situation, score: Score) -> Self {
        let mut state = GameState::new(situation.possession, 0, 0);
        state.situation = situation;
        state.score = score;
        state.pending = PendingAction::None;
        state
    }

    pub fn is_final(&self) -> bool {
        self.phase == GamePhase::Final
    }

    pub fn offense(&self) -> Side {
        self.situation.possession
    }

    pub fn open_drive(&self) -> Option<&Drive> {
        self.drives.last().filter(|d| !d.is_closed())
    }

    pub fn open_drive_mut(&mut self) -> Option<&mut Drive> {
        self.drives.last_mut().filter(|d| !d.is_closed())
    }

    pub fn start_drive(&mut self, start_ep: f64) {
        self.drives.push(Drive {
            team: self.situation.possession,
            start_quarter: self.situation.quarter,
            start_clock: self.situation.clock_seconds,
            start_yardline: self.situation.yardline,
            start_ep,
            plays: 0,
            yards: 0,
            result: None,
            end_yardline: self.situation.yardline,
            points: 0,
            drive_epa: 0.0,
        });
    }

    pub fn record_drive_play(&mut self, yards: i32) {
        if let Some(drive) = self.open_drive_mut() {
            drive.plays += 1;
            drive.yards += yards;
        }
    }

    /// Closes the open drive, crediting `points` to it. No-op without one.
    pub fn close_drive(&mut self, result: DriveResult, points: u32) -> Option<&Drive> {
        let end_yardline = self.situation.yardline;
        let drive = self.open_drive_mut()?;
        drive.result = Some(result);
        drive.end_yardline = end_yardline;
        drive.points = points;
        drive.drive_epa = points as f64 - drive.start_ep;
        self.drives.last()
    }

    pub fn closed_drives(&self) -> impl Iterator<Item = &Drive> {
        self.drives.iter().filter(|d| d.is_closed())
    }

    /// Bounds every tick must leave intact.
    pub fn validate(&self) -> Result<(), SimError> {
        let s = &self.situation;
        if !(1..=4).contains(&s.quarter) {
            return Err(SimError::invariant(format!("quarter {} out of range", s.quarter)));
        }
        if s.clock_seconds > QUARTER_SECONDS {
            return Err(SimError::invariant(format!("clock {} out of range", s.clock_seconds)));
        }
        if !(1..=4).contains(&s.down) {
            return Err(SimError::invariant(format!("down {} out of range", s.down)));
        }
        if s.distance <= 0 {
            return Err(SimError::invariant(format!("distance {} not positive", s.distance)));
        }
        if !(0..=99).contains(&s.yardline) {
            return Err(SimError::invariant(format!("yardline {} out of range", s.yardline)));
        }
        if self.timeouts.home > TIMEOUTS_PER_HALF || self.timeouts.away > TIMEOUTS_PER_HALF {
            return Err(SimError::invariant("timeout bank above three"));
        }
        let open = self.drives.iter().filter(|d| !d.is_closed()).count();
        if open > 1 {
            return Err(SimError::invariant(format!("{open} drives open at once")));
        }
        if self.is_final() && open > 0 {
            return Err(SimError::invariant("drive left open after the final whistle"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_seconds_count_later_quarters() {
        let mut state = GameState::new(Side::Home, 0, 0);
        assert_eq!(state.situation.game_seconds_remaining(), GAME_SECONDS);
        state.situation.quarter = 3;
        state.situation.clock_seconds = 125;
        assert_eq!(state.situation.game_seconds_remaining(), 1025);
    }

    #[test]
    fn empty_timeout_bank_stays_at_zero() {
        let mut t = Timeouts { home: 1, away: 0 };
        assert!(t.spend(Side::Home));
        assert!(!t.spend(Side::Home));
        assert!(!t.spend(Side::Away));
        assert_eq!(t, Timeouts { home: 0, away: 0 });
    }

    #[test]
    fn closing_a_drive_books_epa() {
        let mut state = GameState::new(Side::Home, 0, 0);
        state.pending = PendingAction::None;
        state.start_drive(1.25);
        state.record_drive_play(12);
        let drive = state.close_drive(DriveResult::FieldGoal, 3).unwrap();
        assert_eq!(drive.points, 3);
        assert!((drive.drive_epa - 1.75).abs() < 1e-12);
        assert!(state.close_drive(DriveResult::Punt, 0).is_none());
    }

    #[test]
    fn validate_flags_fifth_down() {
        let mut state = GameState::new(Side::Home, 0, 0);
        state.situation.down = 5;
        assert!(matches!(state.validate(), Err(SimError::InvariantViolation(_))));
    }
}
