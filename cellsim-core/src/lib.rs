//! Vocabulary and shaping engine for the cellsim link emulator.
//!
//! Everything deterministic lives here: the monotonic clock, the trace
//! schedule, the seeded loss model, the bit-exact delivery log, and the
//! [`DelayQueue`] that combines them into one direction of an emulated
//! cellular channel. Raw packet I/O and the event loop live in
//! `cellsim-net` and the `cellsim` binary.
//!
//! # Structure
//!
//! - [`error`]       — [`CellsimError`] and [`Result<T>`] alias
//! - [`clock`]       — [`Clock`] monotonic millisecond time source
//! - [`schedule`]    — [`Schedule`] trace loader / delivery-opportunity queue
//! - [`loss`]        — [`LossModel`] fixed-seed Bernoulli ingress drop
//! - [`trace_log`]   — [`TraceLog`] bit-exact per-direction log writer
//! - [`delay_queue`] — [`DelayQueue`] three-stage shaping pipeline

mod clock;
mod delay_queue;
mod error;
mod loss;
mod schedule;
mod trace_log;

// --- error
pub use error::{CellsimError, Result};

// --- clock
pub use clock::Clock;

// --- schedule
pub use schedule::Schedule;

// --- loss
pub use loss::{LossModel, LOSS_SEED};

// --- trace log
pub use trace_log::TraceLog;

// --- delay queue
pub use delay_queue::{DelayQueue, SERVICE_PACKET_SIZE, WAIT_FOREVER_MS};
