use std::io::Write;

use crate::Result;

// ---------------------------------------------------------------------------
// TraceLog
// ---------------------------------------------------------------------------

/// Per-direction delivery log.
///
/// Line formats are a bit-exact contract consumed by downstream analysis
/// tools (mahimahi-style):
///
/// ```text
/// # Initialized {trace} queue with {n} services.
/// # Direction: {name}
/// # base timestamp: {ms}
/// {now} + {size}                    ingress admitted
/// {now} + {size} (dropped)          ingress queue-limit drop
/// {pdo} # {quantum}                 delivery opportunity fired
/// {pdo} - {size} {latency}          packet delivered
/// ```
///
/// The sink is generic so the daemon can hand in a buffered file while
/// unit tests capture lines in memory.
pub struct TraceLog<W: Write> {
    // ---
    out: W,
}

// ---

impl<W: Write> TraceLog<W> {
    // ---
    pub fn new(out: W) -> Self {
        Self { out }
    }

    // ---

    /// Header block written once at queue construction.
    pub fn preamble(
        &mut self,
        trace_path: &str,
        services: usize,
        name: &str,
        base_ms: u64,
    ) -> Result<()> {
        // ---
        writeln!(
            self.out,
            "# Initialized {trace_path} queue with {services} services."
        )?;
        writeln!(self.out, "# Direction: {name}")?;
        writeln!(self.out, "# base timestamp: {base_ms}")?;
        Ok(())
    }

    // ---

    /// Frame accepted into the propagation stage.
    pub fn admitted(&mut self, now_ms: u64, size: usize) -> Result<()> {
        writeln!(self.out, "{now_ms} + {size}")?;
        Ok(())
    }

    /// Frame discarded because the propagation stage is full.
    pub fn queue_drop(&mut self, now_ms: u64, size: usize) -> Result<()> {
        writeln!(self.out, "{now_ms} + {size} (dropped)")?;
        Ok(())
    }

    /// Delivery opportunity fired, granting `quantum` bytes of credit.
    pub fn service(&mut self, pdo_ms: u64, quantum: usize) -> Result<()> {
        writeln!(self.out, "{pdo_ms} # {quantum}")?;
        Ok(())
    }

    /// Frame fully credited and handed to the delivered buffer.
    pub fn delivered(&mut self, pdo_ms: u64, size: usize, latency_ms: u64) -> Result<()> {
        writeln!(self.out, "{pdo_ms} - {size} {latency_ms}")?;
        Ok(())
    }

    // ---

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
