//! Paced background game loop. The worker owns the simulation; the consumer
//! sees it only through deltas and steers it with commands that are applied
//! between ticks.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::play::TickOutcome;
use crate::sim::Simulation;
use crate::state::{Drive, PlayEvent, Score};

#[derive(Debug, Clone)]
pub enum Delta {
    Event(PlayEvent),
    DriveClosed(Drive),
    Tick {
        outcome: TickOutcome,
        score: Score,
        quarter: u8,
        clock_seconds: u32,
        home_wp: f64,
    },
    Paused,
    Resumed,
    Reset,
    Finished(Score),
    Log(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCommand {
    Pause,
    Resume,
    Reset,
    Stop,
}

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Runs `sim` on a worker thread, one tick per `tick_delay_ms`. The thread
/// returns the simulation when stopped or when either channel hangs up.
pub fn spawn_paced_runner(
    mut sim: Simulation,
    tx: Sender<Delta>,
    cmd_rx: Receiver<SimCommand>,
) -> JoinHandle<Simulation> {
    thread::spawn(move || {
        let delay = Duration::from_millis(sim.config().tick_delay_ms);
        let mut paused = false;
        let mut announced_final = false;

        loop {
            while let Ok(cmd) = cmd_rx.try_recv() {
                if apply_command(&mut sim, cmd, &mut paused, &tx).is_none() {
                    return sim;
                }
                if cmd == SimCommand::Reset {
                    announced_final = false;
                }
            }

            if paused || sim.is_final() {
                match cmd_rx.recv_timeout(IDLE_POLL) {
                    Ok(cmd) => {
                        if apply_command(&mut sim, cmd, &mut paused, &tx).is_none() {
                            return sim;
                        }
                        if cmd == SimCommand::Reset {
                            announced_final = false;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return sim,
                }
                continue;
            }

            let seen_events = sim.events().len();
            let seen_drives = closed_count(&sim);
            let outcome = match sim.tick() {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(error = %err, "tick failed; stopping runner");
                    let _ = tx.send(Delta::Log(format!("[ERROR] {err}")));
                    return sim;
                }
            };

            for event in &sim.events()[seen_events..] {
                if tx.send(Delta::Event(event.clone())).is_err() {
                    return sim;
                }
            }
            if closed_count(&sim) > seen_drives {
                for drive in sim.drives().iter().filter(|d| d.is_closed()).skip(seen_drives) {
                    let _ = tx.send(Delta::DriveClosed(drive.clone()));
                }
            }
            let state = sim.state();
            let _ = tx.send(Delta::Tick {
                outcome,
                score: state.score,
                quarter: state.situation.quarter,
                clock_seconds: state.situation.clock_seconds,
                home_wp: sim.home_win_probability(),
            });

            if sim.is_final() && !announced_final {
                announced_final = true;
                let _ = tx.send(Delta::Finished(sim.state().score));
            }

            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    })
}

/// Applies one command; `None` means stop.
fn apply_command(
    sim: &mut Simulation,
    cmd: SimCommand,
    paused: &mut bool,
    tx: &Sender<Delta>,
) -> Option<()> {
    match cmd {
        SimCommand::Pause => {
            *paused = true;
            let _ = tx.send(Delta::Paused);
        }
        SimCommand::Resume => {
            *paused = false;
            let _ = tx.send(Delta::Resumed);
        }
        SimCommand::Reset => {
            sim.reset();
            let _ = tx.send(Delta::Reset);
        }
        SimCommand::Stop => return None,
    }
    Some(())
}

fn closed_count(sim: &Simulation) -> usize {
    sim.drives().iter().filter(|d| d.is_closed()).count()
}
