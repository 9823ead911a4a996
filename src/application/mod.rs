//! Application layer: the long-running dispatch loop.

pub mod trigger_engine;

pub use trigger_engine::{CycleReport, EngineState, EngineStats, SettledOutcome, TriggerEngine};
