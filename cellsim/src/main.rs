//! cellsim daemon.
//!
//! Sits between two raw L2 interfaces and shapes traffic in both directions
//! to mimic a variable-capacity cellular channel: Bernoulli ingress loss, a
//! fixed propagation delay, and a trace-driven service process granting
//! 1514-byte delivery opportunities.
//!
//! Usage:
//!   cellsim up_trace down_trace up_loss down_loss up_delay_ms down_delay_ms \
//!           internet_iface client_iface up_log down_log

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};

// ---

use clap::Parser;
use tracing::info;

// ---

use cellsim_core::{Clock, DelayQueue, TraceLog};
use cellsim_net::{PacketSocket, Select};

// ---

mod config;

use config::Config;

// ---------------------------------------------------------------------------
// Shutdown wiring
// ---------------------------------------------------------------------------

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    // SAFETY: on_signal has a stable address and performs only a single
    // atomic store, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, on_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGHUP, on_signal as *const () as libc::sighandler_t);
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();
    cfg.validate()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    install_signal_handlers();

    // Delivery logs are a bit-exact contract: truncate on open, buffer
    // line writes, flush once at shutdown.
    let up_log = TraceLog::new(BufWriter::new(File::create(&cfg.up_log)?));
    let down_log = TraceLog::new(BufWriter::new(File::create(&cfg.down_log)?));

    let internet_side = PacketSocket::open(&cfg.internet_iface)?;
    let client_side = PacketSocket::open(&cfg.client_iface)?;

    // Both directions share one base timestamp so their logs line up.
    let clock = Clock::new();
    let base = clock.now_ms();

    let mut uplink = DelayQueue::new(
        up_log,
        "uplink",
        cfg.up_delay_ms,
        &cfg.up_trace,
        base,
        cfg.up_loss,
    )?;
    let mut downlink = DelayQueue::new(
        down_log,
        "downlink",
        cfg.down_delay_ms,
        &cfg.down_trace,
        base,
        cfg.down_loss,
    )?;

    let mut select = Select::new();
    select.add_fd(internet_side.fd());
    select.add_fd(client_side.fd());

    info!(
        internet = %cfg.internet_iface,
        client = %cfg.client_iface,
        base_ms = base,
        "cellsim running",
    );

    while !SHUTDOWN.load(Ordering::Relaxed) {
        // ---
        let now = clock.now_ms();
        let wait = uplink.wait_time(now)?.min(downlink.wait_time(now)?);
        select.wait(wait)?;

        let now = clock.now_ms();

        if select.is_readable(client_side.fd()) {
            for frame in client_side.recv_all()? {
                uplink.write(frame, now)?;
            }
        }

        if select.is_readable(internet_side.fd()) {
            for frame in internet_side.recv_all()? {
                downlink.write(frame, now)?;
            }
        }

        for frame in uplink.read(now)? {
            internet_side.send(&frame)?;
        }
        for frame in downlink.read(now)? {
            client_side.send(&frame)?;
        }
    }

    uplink.finish()?;
    downlink.finish()?;
    info!("shutting down");

    Ok(())
}
