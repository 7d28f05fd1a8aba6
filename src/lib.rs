//! Discrete-time, event-driven simulation core for a FANET mesh emulator.
//!
//! This crate is the core described in `SPEC_FULL.md`: a shared wireless
//! medium with contention-based MAC, a per-node concurrent protocol stack
//! (mobility, neighbor discovery, distance-vector routing, session
//! handshake, data delivery), and performance accounting. The visualizer,
//! the configuration source, and the process entry point are external
//! collaborators and are deliberately not part of this crate; host
//! applications provide a [`sink::ObservationSink`] and a
//! [`config::SimulationConfig`] and drive [`orchestrator::Simulation`].

pub mod channel;
pub mod config;
pub mod error;
pub mod geometry;
pub mod message;
pub mod metrics;
pub mod neighbor;
pub mod node;
pub mod orchestrator;
pub mod routing;
pub mod runtime;
pub mod sink;

pub use config::SimulationConfig;
pub use error::ConfigError;
pub use metrics::Report;
pub use orchestrator::Simulation;
pub use sink::{NullSink, ObservationSink};
