use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{CellsimError, Result};

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// FIFO of absolute delivery-opportunity timestamps in milliseconds.
///
/// Loaded from a trace file of one unsigned millisecond offset per line;
/// each offset has a base timestamp added so entries are absolute. When the
/// queue runs dry the owner reloads with the current time as the new base,
/// cycling the trace so an emulation can outlive the file.
pub struct Schedule {
    // ---
    path: PathBuf,
    times: VecDeque<u64>,
}

// ---

impl Schedule {
    // ---

    /// Load the trace at `path`, adding `base_ms` to every offset.
    ///
    /// Fails with [`CellsimError::Config`] when the file cannot be read.
    /// An empty trace is legal — the schedule simply never imposes a
    /// deadline.
    pub fn from_file(path: impl AsRef<Path>, base_ms: u64) -> Result<Self> {
        // ---
        let mut schedule = Self {
            path: path.as_ref().to_path_buf(),
            times: VecDeque::new(),
        };
        schedule.reload(base_ms)?;
        Ok(schedule)
    }

    // ---

    /// Repopulate from the trace file with a new base.
    ///
    /// Only legal when the queue is empty — reloading over live entries
    /// would interleave two bases and break monotonicity.
    pub fn reload(&mut self, base_ms: u64) -> Result<()> {
        // ---
        assert!(self.times.is_empty(), "schedule reload over live entries");

        let text = fs::read_to_string(&self.path).map_err(|e| {
            CellsimError::Config(format!("cannot read trace {}: {e}", self.path.display()))
        })?;

        for line in text.lines() {
            // Parsing stops at the first line that is not a bare unsigned
            // decimal, so a trailing garbage line truncates rather than
            // aborts the trace.
            let Ok(offset) = line.trim().parse::<u64>() else {
                break;
            };
            let abs = offset + base_ms;
            if let Some(&last) = self.times.back() {
                assert!(
                    abs >= last,
                    "trace {} offsets go backwards: {abs} < {last}",
                    self.path.display(),
                );
            }
            self.times.push_back(abs);
        }
        Ok(())
    }

    // ---

    pub fn front(&self) -> Option<u64> {
        self.times.front().copied()
    }

    pub fn pop_front(&mut self) -> Option<u64> {
        self.times.pop_front()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
