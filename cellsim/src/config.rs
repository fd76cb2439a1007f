//! CLI configuration for `cellsim`.
//!
//! Invocation is positional, matching the trace-driven link emulators this
//! tool interoperates with:
//!
//!   cellsim up.trace down.trace 0.02 0.0 40 40 eth0 eth1 up.log down.log

use std::path::PathBuf;

use clap::Parser;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "cellsim",
    about = "Bidirectional trace-driven cellular link emulator"
)]
pub struct Config {
    // ---
    /// Uplink trace: one delivery-opportunity millisecond offset per line,
    /// non-decreasing.
    pub up_trace: PathBuf,

    /// Downlink trace, same format as the uplink trace.
    pub down_trace: PathBuf,

    /// Uplink Bernoulli loss rate in [0, 1).
    pub up_loss: f64,

    /// Downlink Bernoulli loss rate in [0, 1).
    pub down_loss: f64,

    /// Uplink propagation delay in milliseconds.
    pub up_delay_ms: u64,

    /// Downlink propagation delay in milliseconds.
    pub down_delay_ms: u64,

    /// Interface facing the wider network.
    pub internet_iface: String,

    /// Interface facing the client under test.
    pub client_iface: String,

    /// Uplink delivery log path (truncated on open).
    pub up_log: PathBuf,

    /// Downlink delivery log path (truncated on open).
    pub down_log: PathBuf,
}

// ---

impl Config {
    // ---

    /// Validate fields clap cannot express as type constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        // ---
        for (label, rate) in [("up_loss", self.up_loss), ("down_loss", self.down_loss)] {
            if !(0.0..1.0).contains(&rate) {
                anyhow::bail!("{label} must be in [0, 1), got {rate}");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
