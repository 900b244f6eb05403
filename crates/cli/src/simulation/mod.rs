//! Simulated dispatch runs.

mod orchestrator;
mod verify;
mod workload;

pub use orchestrator::{Simulation, SimulationSettings};
