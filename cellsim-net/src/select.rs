use std::io;
use std::os::unix::io::RawFd;

use cellsim_core::{CellsimError, Result};

// ---------------------------------------------------------------------------
// Select
// ---------------------------------------------------------------------------

/// Readiness multiplexer over a fixed set of descriptors.
///
/// Thin wrapper around `poll(2)`. Register descriptors once at startup,
/// then alternate [`Select::wait`] / [`Select::is_readable`] from the event
/// loop. A wait interrupted by a signal reports zero ready descriptors so
/// the caller's shutdown-flag check runs.
pub struct Select {
    // ---
    fds: Vec<libc::pollfd>,
}

// ---

impl Select {
    // ---
    pub fn new() -> Self {
        Self { fds: Vec::new() }
    }

    // ---

    /// Register a descriptor for readability.
    pub fn add_fd(&mut self, fd: RawFd) {
        // ---
        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
    }

    // ---

    /// Block until a registered descriptor is readable or `timeout_ms`
    /// elapses. Returns the number of ready descriptors.
    ///
    /// Timeouts beyond `i32::MAX` are clamped; callers pass `u64::MAX` to
    /// mean "no deadline".
    pub fn wait(&mut self, timeout_ms: u64) -> Result<usize> {
        // ---
        for p in &mut self.fds {
            p.revents = 0;
        }

        let timeout = timeout_ms.min(i32::MAX as u64) as i32;
        // SAFETY: fds points at a live, correctly sized pollfd array.
        let rc = unsafe {
            libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout)
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(CellsimError::Io(err));
        }
        Ok(rc as usize)
    }

    // ---

    /// Whether `fd` reported readable after the last [`Select::wait`].
    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.fds
            .iter()
            .any(|p| p.fd == fd && p.revents & libc::POLLIN != 0)
    }
}

// ---

impl Default for Select {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::Select;

    // ---

    /// An empty pipe times out; a pipe with pending bytes wakes the poll
    /// and reports readable.
    #[test]
    fn pipe_readiness_and_timeout() {
        // ---
        let mut fds = [0i32; 2];
        // SAFETY: fds is a valid two-element array for pipe(2).
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe(2) failed");
        let (rd, wr) = (fds[0], fds[1]);

        let mut select = Select::new();
        select.add_fd(rd);

        let ready = select.wait(10).expect("poll");
        assert_eq!(ready, 0, "empty pipe must time out with zero ready fds");
        assert!(!select.is_readable(rd));

        // SAFETY: valid fd and a one-byte buffer.
        let n = unsafe { libc::write(wr, [0x2au8].as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1, "pipe write failed");

        let ready = select.wait(1_000).expect("poll");
        assert_eq!(ready, 1, "pipe with data must wake the poll");
        assert!(select.is_readable(rd));
        assert!(!select.is_readable(wr), "write end was never registered");

        // SAFETY: closing fds we own.
        unsafe {
            libc::close(rd);
            libc::close(wr);
        }
    }
}
