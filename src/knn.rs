//! k-nearest-neighbor estimator over historical game states.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_KNN_K;
use crate::error::{SimError, SimResult};

pub const FEATURE_COUNT: usize = 7;
const SCALE_FLOOR: f64 = 1e-6;
const WEIGHT_EPS: f64 = 1e-9;

/// Situational features, in the estimator's own conventions: yardline is
/// measured to the opponent's goal and the score differential is from the
/// possessing team's side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateFeatures {
    pub quarter: f64,
    pub down: f64,
    pub distance: f64,
    pub yardline_100: f64,
    pub seconds_remaining: f64,
    pub score_differential: f64,
    pub possession_is_home: f64,
}

impl StateFeatures {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.quarter,
            self.down,
            self.distance,
            self.yardline_100,
            self.seconds_remaining,
            self.score_differential,
            self.possession_is_home,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsOutcome {
    pub win_prob: f64,
    pub expected_points: f64,
    pub epa: f64,
    pub td_prob: f64,
    pub fg_prob: f64,
    pub safety_prob: f64,
    pub no_score_prob: f64,
}

impl MetricsOutcome {
    pub fn neutral() -> Self {
        Self {
            win_prob: 0.5,
            expected_points: 0.0,
            epa: 0.0,
            td_prob: 0.0,
            fg_prob: 0.0,
            safety_prob: 0.0,
            no_score_prob: 1.0,
        }
    }

    fn to_array(self) -> [f64; 7] {
        [
            self.win_prob,
            self.expected_points,
            self.epa,
            self.td_prob,
            self.fg_prob,
            self.safety_prob,
            self.no_score_prob,
        ]
    }

    fn from_array(v: [f64; 7]) -> Self {
        Self {
            win_prob: v[0],
            expected_points: v[1],
            epa: v[2],
            td_prob: v[3],
            fg_prob: v[4],
            safety_prob: v[5],
            no_score_prob: v[6],
        }
    }

    fn renormalize_scoring(&mut self) {
        let sum = self.td_prob + self.fg_prob + self.safety_prob + self.no_score_prob;
        if sum > 0.0 && sum.is_finite() {
            self.td_prob /= sum;
            self.fg_prob /= sum;
            self.safety_prob /= sum;
            self.no_score_prob /= sum;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
    pub features: StateFeatures,
    pub outcome: MetricsOutcome,
}

impl HistoricalRow {
    pub fn is_finite(&self) -> bool {
        self.features.to_array().iter().all(|v| v.is_finite())
            && self.outcome.to_array().iter().all(|v| v.is_finite())
    }
}

/// The loaded estimator. Immutable once built.
#[derive(Debug, Clone)]
pub struct MetricsModel {
    rows: Vec<HistoricalRow>,
    scaled: Vec<[f64; FEATURE_COUNT]>,
    scale: [f64; FEATURE_COUNT],
}

impl MetricsModel {
    /// Builds the estimator, dropping rows with non-finite values.
    pub fn initialize(rows: Vec<HistoricalRow>) -> SimResult<Self> {
        let total = rows.len();
        let rows: Vec<HistoricalRow> = rows.into_iter().filter(|r| r.is_finite()).collect();
        if rows.is_empty() {
            return Err(SimError::data(format!(
                "no usable historical rows ({total} read, all non-finite or empty)"
            )));
        }
        if rows.len() < total {
            tracing::debug!(dropped = total - rows.len(), "discarded non-finite historical rows");
        }

        let mut scale = [1.0; FEATURE_COUNT];
        for (dim, slot) in scale.iter_mut().enumerate() {
            let mut column: Vec<f64> = rows.iter().map(|r| r.features.to_array()[dim]).collect();
            column.sort_by(|a, b| a.total_cmp(b));
            let spread = percentile(&column, 0.90) - percentile(&column, 0.10);
            *slot = spread.max(SCALE_FLOOR);
        }

        let scaled = rows
            .iter()
            .map(|r| scale_features(&r.features, &scale))
            .collect();

        Ok(Self { rows, scaled, scale })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn scale(&self) -> &[f64; FEATURE_COUNT] {
        &self.scale
    }

    /// Inverse-distance weighted average over the `k` nearest rows.
    pub fn estimate(&self, query: &StateFeatures, k: usize) -> MetricsOutcome {
        let k = k.max(1).min(self.rows.len());
        let q = scale_features(query, &self.scale);

        // Bounded insertion selection: `best` stays sorted by distance.
        let mut best: Vec<(f64, usize)> = Vec::with_capacity(k + 1);
        for (idx, row) in self.scaled.iter().enumerate() {
            let d = squared_distance(&q, row);
            if best.len() == k && d >= best[k - 1].0 {
                continue;
            }
            let mut pos = best.len();
            while pos > 0 && best[pos - 1].0 > d {
                pos -= 1;
            }
            best.insert(pos, (d, idx));
            if best.len() > k {
                best.pop();
            }
        }

        let exact: Vec<usize> = best
            .iter()
            .take_while(|(d, _)| *d == 0.0)
            .map(|(_, idx)| *idx)
            .collect();
        if exact.len() == 1 {
            return self.rows[exact[0]].outcome;
        }
        if exact.len() > 1 {
            let mut sum = [0.0; 7];
            for idx in &exact {
                for (acc, v) in sum.iter_mut().zip(self.rows[*idx].outcome.to_array()) {
                    *acc += v;
                }
            }
            let n = exact.len() as f64;
            let mut out = MetricsOutcome::from_array(sum.map(|v| v / n));
            out.renormalize_scoring();
            return out;
        }

        let mut sum = [0.0; 7];
        let mut weight_sum = 0.0;
        for (d, idx) in &best {
            let w = 1.0 / (WEIGHT_EPS + d.sqrt());
            if !(w.is_finite() && w > 0.0) {
                continue;
            }
            weight_sum += w;
            for (acc, v) in sum.iter_mut().zip(self.rows[*idx].outcome.to_array()) {
                *acc += w * v;
            }
        }
        if weight_sum <= 0.0 {
            return MetricsOutcome::neutral();
        }
        let mut out = MetricsOutcome::from_array(sum.map(|v| v / weight_sum));
        out.renormalize_scoring();
        out
    }
}

fn scale_features(f: &StateFeatures, scale: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
    let raw = f.to_array();
    let mut out = [0.0; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        out[i] = raw[i] / scale[i];
    }
    out
}

fn squared_distance(a: &[f64; FEATURE_COUNT], b: &[f64; FEATURE_COUNT]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Readiness gate around a model that may still be loading on another thread.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    cell: Arc<OnceCell<Arc<MetricsModel>>>,
}

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(model: MetricsModel) -> Self {
        let handle = Self::new();
        handle.install(model);
        handle
    }

    /// Publishes the model; later installs are ignored.
    pub fn install(&self, model: MetricsModel) -> bool {
        self.cell.set(Arc::new(model)).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The model if it has finished loading. Never blocks.
    pub fn snapshot(&self) -> Option<Arc<MetricsModel>> {
        self.cell.get().cloned()
    }

    pub fn estimate(&self, query: &StateFeatures, k: usize) -> SimResult<MetricsOutcome> {
        let model = self.cell.get().ok_or(SimError::NotReady("historical estimator"))?;
        Ok(model.estimate(query, k))
    }

    pub fn estimate_default(&self, query: &StateFeatures) -> SimResult<MetricsOutcome> {
        self.estimate(query, DEFAULT_KNN_K)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(quarter: f64, yl: f64, diff: f64, wp: f64, ep: f64) -> HistoricalRow {
        HistoricalRow {
            features: StateFeatures {
                quarter,
                down: 1.0,
                distance: 10.0,
                yardline_100: yl,
                seconds_remaining: (4.0 - quarter) * 900.0 + 450.0,
                score_differential: diff,
                possession_is_home: 1.0,
            },
            outcome: MetricsOutcome {
                win_prob: wp,
                expected_points: ep,
                epa: 0.1,
                td_prob: 0.3,
                fg_prob: 0.2,
                safety_prob: 0.01,
                no_score_prob: 0.49,
            },
        }
    }

    fn table() -> Vec<HistoricalRow> {
        let mut rows = Vec::new();
        for q in 1..=4 {
            for yl in (5..=95).step_by(10) {
                for diff in [-14.0, -7.0, 0.0, 7.0, 14.0] {
                    let wp = (0.5 + diff / 40.0 + (q as f64) * 0.01).clamp(0.01, 0.99);
                    let ep = 6.0 - (yl as f64) * 0.07;
                    rows.push(row(q as f64, yl as f64, diff, wp, ep));
                }
            }
        }
        rows
    }

    #[test]
    fn exact_match_with_k1_returns_row() {
        let rows = table();
        let query_row = rows[37];
        let model = MetricsModel::initialize(rows).unwrap();
        let out = model.estimate(&query_row.features, 1);
        assert_eq!(out, query_row.outcome);
    }

    #[test]
    fn scoring_probs_sum_to_one() {
        let model = MetricsModel::initialize(table()).unwrap();
        let mut q = table()[12].features;
        q.yardline_100 += 3.3;
        q.score_differential += 1.5;
        let out = model.estimate(&q, 25);
        let sum = out.td_prob + out.fg_prob + out.safety_prob + out.no_score_prob;
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(out.win_prob > 0.0 && out.win_prob < 1.0);
    }

    #[test]
    fn k_larger_than_table_uses_every_row() {
        let rows: Vec<_> = table().into_iter().take(5).collect();
        let model = MetricsModel::initialize(rows).unwrap();
        let mut q = model.rows[0].features;
        q.quarter += 0.5;
        let out = model.estimate(&q, 10_000);
        assert!(out.expected_points.is_finite());
    }

    #[test]
    fn non_finite_rows_are_dropped_and_empty_fails() {
        let mut rows = table();
        rows[0].outcome.win_prob = f64::NAN;
        let n = rows.len();
        let model = MetricsModel::initialize(rows).unwrap();
        assert_eq!(model.len(), n - 1);

        let mut bad = row(1.0, 50.0, 0.0, 0.5, 1.0);
        bad.features.distance = f64::INFINITY;
        assert!(matches!(
            MetricsModel::initialize(vec![bad]),
            Err(SimError::DataError(_))
        ));
    }

    #[test]
    fn degenerate_dimension_uses_scale_floor() {
        let model = MetricsModel::initialize(table()).unwrap();
        // every row has down 1 and possession at home
        assert_eq!(model.scale()[1], SCALE_FLOOR);
        assert_eq!(model.scale()[6], SCALE_FLOOR);
    }

    #[test]
    fn handle_reports_not_ready_until_installed() {
        let handle = MetricsHandle::new();
        let q = table()[0].features;
        assert_eq!(
            handle.estimate(&q, 5),
            Err(SimError::NotReady("historical estimator"))
        );
        assert!(handle.install(MetricsModel::initialize(table()).unwrap()));
        assert!(handle.is_ready());
        assert!(handle.estimate(&q, 5).is_ok());
        assert!(!handle.install(MetricsModel::initialize(table()).unwrap()));
    }
}
