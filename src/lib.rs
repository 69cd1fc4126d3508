pub mod calibration;
pub mod clock;
pub mod config;
pub mod drive_ep;
pub mod error;
pub mod expected_points;
pub mod export;
pub mod historical_dataset;
pub mod knn;
pub mod models;
pub mod play;
pub mod prior;
pub mod ratings;
pub mod runner;
pub mod sim;
pub mod special_teams;
pub mod state;
pub mod win_prob;

pub use error::{SimError, SimResult};
pub use sim::Simulation;
