//! Cooperative single-threaded runtime: a virtual clock, a minimal
//! executor, and an async-aware FIFO mailbox. Together these replace the
//! template's real-time, multi-threaded Embassy stack with something the
//! spec's determinism and single-task-at-a-time requirements actually
//! permit (see `SPEC_FULL.md`, "Scheduling and clock").

pub mod clock;
pub mod executor;
pub mod queue;

pub use clock::VirtualClock;
pub use executor::{Executor, Spawner};
pub use queue::Queue;
