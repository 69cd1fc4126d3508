//! Scoring of home win probabilities against final results.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    HomeWin,
    Tie,
    AwayWin,
}

impl GameOutcome {
    /// Realized value of the home side's win indicator; a tie counts half.
    pub fn target(self) -> f64 {
        match self {
            GameOutcome::HomeWin => 1.0,
            GameOutcome::Tie => 0.5,
            GameOutcome::AwayWin => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

pub fn classify_outcome(home_points: u32, away_points: u32) -> GameOutcome {
    if home_points > away_points {
        GameOutcome::HomeWin
    } else if home_points < away_points {
        GameOutcome::AwayWin
    } else {
        GameOutcome::Tie
    }
}

pub fn evaluate(predictions: &[f64], outcomes: &[GameOutcome]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::default();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0.0_f64;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let p = p.clamp(1e-12, 1.0 - 1e-12);
        let y = outcome.target();
        brier_sum += (p - y).powi(2);
        log_loss_sum += -(y * p.ln() + (1.0 - y) * (1.0 - p).ln());
        correct += match outcome {
            GameOutcome::HomeWin if p > 0.5 => 1.0,
            GameOutcome::AwayWin if p < 0.5 => 1.0,
            GameOutcome::Tie => 0.5,
            _ => 0.0,
        };
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct / n,
    }
}

/// Sharpens (`scale > 1`) or softens a probability in logit space.
pub fn apply_logit_scale(p: f64, logit_scale: f64) -> f64 {
    let s = logit_scale.clamp(0.50, 1.80);
    let p = p.clamp(1e-9, 1.0 - 1e-9);
    let logit = (p / (1.0 - p)).ln() * s;
    1.0 / (1.0 + (-logit).exp())
}

/// Grid search for the logit scale that minimizes log loss.
pub fn fit_logit_scale(predictions: &[f64], outcomes: &[GameOutcome]) -> (f64, Metrics) {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return (1.0, Metrics::default());
    }

    let mut best_scale = 1.0;
    let mut best_metrics = evaluate(predictions, outcomes);
    for step in 35..=65 {
        let scale = step as f64 / 50.0; // 0.70..1.30
        let scaled: Vec<f64> = predictions
            .iter()
            .map(|p| apply_logit_scale(*p, scale))
            .collect();
        let metrics = evaluate(&scaled, outcomes);
        if metrics.log_loss < best_metrics.log_loss {
            best_metrics = metrics;
            best_scale = scale;
        }
    }
    (best_scale, best_metrics)
}

pub fn calibration_bins(
    predictions: &[f64],
    outcomes: &[GameOutcome],
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        actual_sum[idx] += outcome.target();
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let preds = vec![1.0, 0.0];
        let outcomes = vec![GameOutcome::HomeWin, GameOutcome::AwayWin];
        let m = evaluate(&preds, &outcomes);
        assert_eq!(m.samples, 2);
        assert!(m.brier < 1e-12);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn coin_flip_log_loss_is_ln2() {
        let preds = vec![0.5; 4];
        let outcomes = vec![
            GameOutcome::HomeWin,
            GameOutcome::AwayWin,
            GameOutcome::HomeWin,
            GameOutcome::Tie,
        ];
        let m = evaluate(&preds, &outcomes);
        assert!((m.log_loss - std::f64::consts::LN_2).abs() < 1e-9);
    }

    #[test]
    fn logit_scale_is_symmetric() {
        let up = apply_logit_scale(0.7, 1.2);
        let down = apply_logit_scale(0.3, 1.2);
        assert!(up > 0.7);
        assert!((up + down - 1.0).abs() < 1e-9);
        assert!((apply_logit_scale(0.5, 1.7) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bins_cover_every_sample() {
        let preds = vec![0.05, 0.55, 0.56, 0.99, 1.0];
        let outcomes = vec![
            GameOutcome::AwayWin,
            GameOutcome::HomeWin,
            GameOutcome::AwayWin,
            GameOutcome::HomeWin,
            GameOutcome::HomeWin,
        ];
        let bins = calibration_bins(&preds, &outcomes, 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 5);
        assert_eq!(bins[5].count, 2);
        assert!((bins[5].actual_rate - 0.5).abs() < 1e-12);
        assert_eq!(bins[9].count, 2);
    }
}
