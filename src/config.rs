use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_KNN_K: usize = 200;
pub const DEFAULT_MIN_TIMEOUT_GAP_SECS: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precipitation {
    #[default]
    None,
    Rain,
    Snow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weather {
    pub wind_mph: f64,
    pub temperature_f: f64,
    pub precipitation: Precipitation,
}

impl Default for Weather {
    fn default() -> Self {
        Self {
            wind_mph: 5.0,
            temperature_f: 60.0,
            precipitation: Precipitation::None,
        }
    }
}

impl Weather {
    /// Completion-rate penalty from wind, cold and precipitation.
    pub fn passing_penalty(&self) -> f64 {
        let wind = ((self.wind_mph - 15.0).max(0.0) * 0.004).min(0.08);
        let cold = if self.temperature_f < 32.0 { 0.02 } else { 0.0 };
        let wet = match self.precipitation {
            Precipitation::None => 0.0,
            Precipitation::Rain => 0.03,
            Precipitation::Snow => 0.05,
        };
        wind + cold + wet
    }

    /// Yards of field-goal range lost to wind and cold.
    pub fn kicking_range_penalty(&self) -> f64 {
        let wind = (self.wind_mph - 10.0).max(0.0) * 0.25;
        let cold = if self.temperature_f < 32.0 { 2.0 } else { 0.0 };
        (wind + cold).min(10.0)
    }

    /// Make-probability penalty applied to every kick.
    pub fn kicking_accuracy_penalty(&self) -> f64 {
        let wind = (self.wind_mph - 12.0).max(0.0) * 0.004;
        let wet = match self.precipitation {
            Precipitation::None => 0.0,
            Precipitation::Rain => 0.02,
            Precipitation::Snow => 0.04,
        };
        (wind + wet).min(0.12)
    }
}

/// Knobs read at decision time. Every field has a default and is clamped to
/// a sane range when loaded, never rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub weather: Weather,
    /// Added to the pass rate before the [0.40, 0.65] clamp.
    pub pass_bias: f64,
    /// Multiplier on the 4th-down go-for-it threshold.
    pub aggressiveness: f64,
    /// Multiplier on yardage standard deviations.
    pub variance: f64,
    pub penalty_rate: f64,
    pub knn_k: usize,
    pub min_timeout_gap_secs: u32,
    /// External pacing between ticks; never read by the engine itself.
    pub tick_delay_ms: u64,
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            weather: Weather::default(),
            pass_bias: 0.0,
            aggressiveness: 1.0,
            variance: 1.0,
            penalty_rate: 0.035,
            knn_k: DEFAULT_KNN_K,
            min_timeout_gap_secs: DEFAULT_MIN_TIMEOUT_GAP_SECS,
            tick_delay_ms: 0,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Defaults overridden by `SIM_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Loads a JSON config file, then applies environment overrides on top.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read sim config {}", path.display()))?;
        let mut cfg: SimConfig = serde_json::from_str(&raw).context("parse sim config json")?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_f64("SIM_WIND_MPH") {
            self.weather.wind_mph = v;
        }
        if let Some(v) = env_f64("SIM_TEMPERATURE_F") {
            self.weather.temperature_f = v;
        }
        if let Ok(raw) = env::var("SIM_PRECIPITATION") {
            self.weather.precipitation = match raw.trim().to_ascii_lowercase().as_str() {
                "rain" => Precipitation::Rain,
                "snow" => Precipitation::Snow,
                _ => Precipitation::None,
            };
        }
        if let Some(v) = env_f64("SIM_PASS_BIAS") {
            self.pass_bias = v;
        }
        if let Some(v) = env_f64("SIM_AGGRESSIVENESS") {
            self.aggressiveness = v;
        }
        if let Some(v) = env_f64("SIM_VARIANCE") {
            self.variance = v;
        }
        if let Some(v) = env_f64("SIM_PENALTY_RATE") {
            self.penalty_rate = v;
        }
        if let Some(v) = env_parse::<usize>("SIM_KNN_K") {
            self.knn_k = v;
        }
        if let Some(v) = env_parse::<u64>("SIM_TICK_DELAY_MS") {
            self.tick_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("SIM_SEED") {
            self.seed = Some(v);
        }
        self.sanitize();
    }

    pub fn sanitize(&mut self) {
        self.weather.wind_mph = finite_or(self.weather.wind_mph, 5.0).clamp(0.0, 60.0);
        self.weather.temperature_f = finite_or(self.weather.temperature_f, 60.0).clamp(-30.0, 120.0);
        self.pass_bias = finite_or(self.pass_bias, 0.0).clamp(-0.25, 0.25);
        self.aggressiveness = finite_or(self.aggressiveness, 1.0).clamp(0.25, 3.0);
        self.variance = finite_or(self.variance, 1.0).clamp(0.25, 3.0);
        self.penalty_rate = finite_or(self.penalty_rate, 0.035).clamp(0.0, 0.20);
        self.knn_k = self.knn_k.clamp(1, 5_000);
        self.tick_delay_ms = self.tick_delay_ms.min(60_000);
    }
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() { v } else { fallback }
}

fn env_f64(key: &str) -> Option<f64> {
    env_parse::<f64>(key).filter(|v| v.is_finite())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}
