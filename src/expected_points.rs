//! Closed-form expected points for a down, distance and field position.
//!
//! Pure arithmetic with no dependency on the historical estimator, so the
//! same inputs always produce the same bits.

pub const EP_MIN: f64 = -2.5;
pub const EP_MAX: f64 = 6.95;

const EP_OWN_GOAL: f64 = -1.40;
const EP_OPP_GOAL: f64 = 6.00;
// Logistic steepness; with the endpoints above it gives ~0.12 EP/yard at midfield.
const EP_CURVE_K: f64 = 0.0582;

const DOWN_PENALTY: [f64; 4] = [0.0, -0.70, -1.45, -2.35];
const EARLY_DOWN_YARD_PENALTY: f64 = 0.020;
const LATE_DOWN_YARD_PENALTY: f64 = 0.055;
const LATE_DOWN_LONG_PENALTY: f64 = 0.035;

/// Expected points for the offense, clamped to `[EP_MIN, EP_MAX]`.
pub fn expected_points(down: u8, distance: f64, yardline: f64) -> f64 {
    let yardline = yardline.clamp(0.0, 100.0);
    let distance = distance.max(0.0);
    let field_fraction = yardline / 100.0;

    let down_idx = (down.clamp(1, 4) - 1) as usize;
    let down_term = DOWN_PENALTY[down_idx] * (1.0 - field_fraction);

    let extra_yards = (distance - 1.0).max(0.0);
    let distance_term = if down >= 3 {
        -LATE_DOWN_YARD_PENALTY * extra_yards
            - LATE_DOWN_LONG_PENALTY * (distance - 10.0).max(0.0)
    } else {
        -EARLY_DOWN_YARD_PENALTY * extra_yards
    };

    (base_curve(yardline) + down_term + distance_term).clamp(EP_MIN, EP_MAX)
}

/// Field-position value of a first down, before down/distance penalties.
fn base_curve(yardline: f64) -> f64 {
    let lo = logistic(EP_CURVE_K * -50.0);
    let hi = logistic(EP_CURVE_K * 50.0);
    let frac = (logistic(EP_CURVE_K * (yardline - 50.0)) - lo) / (hi - lo);
    EP_OWN_GOAL + (EP_OPP_GOAL - EP_OWN_GOAL) * frac
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
