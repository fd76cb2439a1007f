use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

// ---

use tracing::debug;

// ---

use cellsim_core::{CellsimError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Receive buffer large enough for any single L2 frame we expect to see.
const RECV_BUF_LEN: usize = 65_536;

// ---------------------------------------------------------------------------
// PacketSocket
// ---------------------------------------------------------------------------

/// Raw L2 endpoint on one named interface.
///
/// The socket is bound with `ETH_P_ALL`, joined to promiscuous mode so
/// frames addressed to forwarded hosts are seen, and switched to
/// non-blocking so [`PacketSocket::recv_all`] can drain every queued frame
/// without stalling the event loop.
///
/// Requires `CAP_NET_RAW`.
pub struct PacketSocket {
    // ---
    fd: RawFd,
    iface: String,
}

// ---

impl PacketSocket {
    // ---

    /// Open and bind a raw socket on `iface`.
    pub fn open(iface: &str) -> Result<Self> {
        // ---
        let proto = (libc::ETH_P_ALL as u16).to_be();

        // SAFETY: plain socket(2) call; the fd is checked before use.
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, proto as i32) };
        if fd < 0 {
            return Err(last_error("socket", iface));
        }
        let socket = Self {
            fd,
            iface: iface.to_string(),
        };

        let c_iface = CString::new(iface)
            .map_err(|_| CellsimError::Config(format!("interface name {iface:?} contains NUL")))?;

        // SAFETY: c_iface is a valid NUL-terminated string.
        let ifindex = unsafe { libc::if_nametoindex(c_iface.as_ptr()) };
        if ifindex == 0 {
            return Err(last_error("if_nametoindex", iface));
        }

        // SAFETY: sockaddr_ll is zero-initialized then filled in; the cast
        // matches what bind(2) expects for AF_PACKET.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = proto;
        addr.sll_ifindex = ifindex as i32;
        // SAFETY: addr is live for the duration of the call and the length
        // matches its type.
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(last_error("bind", iface));
        }

        // Promiscuous membership: the emulator forwards frames for hosts
        // behind it, so it must see traffic not addressed to this NIC.
        // SAFETY: packet_mreq is zero-initialized then filled in.
        let mut mreq: libc::packet_mreq = unsafe { std::mem::zeroed() };
        mreq.mr_ifindex = ifindex as i32;
        mreq.mr_type = libc::PACKET_MR_PROMISC as u16;
        // SAFETY: mreq is live for the duration of the call and the length
        // matches its type.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const libc::packet_mreq as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(last_error("setsockopt", iface));
        }

        // SAFETY: fcntl on a fd we own.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(last_error("fcntl", iface));
        }
        // SAFETY: fcntl on a fd we own with flags read above.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(last_error("fcntl", iface));
        }

        debug!(iface, ifindex, "packet socket bound");
        Ok(socket)
    }

    // ---

    /// Drain every frame currently queued on the socket.
    ///
    /// Returns when the kernel reports `EWOULDBLOCK`. Each element is one
    /// complete L2 frame, opaque to the caller.
    pub fn recv_all(&self) -> Result<Vec<Vec<u8>>> {
        // ---
        let mut frames = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_LEN];

        loop {
            // SAFETY: buf outlives the call and the length matches.
            let n = unsafe {
                libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => {
                        return Err(CellsimError::Socket {
                            op: "recv",
                            iface: self.iface.clone(),
                            source: err,
                        })
                    }
                }
            }
            frames.push(buf[..n as usize].to_vec());
        }
        Ok(frames)
    }

    // ---

    /// Transmit one frame on the bound interface.
    ///
    /// A transmit ring momentarily full is treated like a link drop, not a
    /// failure — the frame is discarded and the loop continues.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        // ---
        // SAFETY: frame pointer and length describe a live slice.
        let n =
            unsafe { libc::send(self.fd, frame.as_ptr() as *const libc::c_void, frame.len(), 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                debug!(iface = %self.iface, len = frame.len(), "tx ring full, frame dropped");
                return Ok(());
            }
            return Err(CellsimError::Socket {
                op: "send",
                iface: self.iface.clone(),
                source: err,
            });
        }
        Ok(())
    }

    // ---

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }
}

// ---

impl Drop for PacketSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this socket and closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}

// ---

fn last_error(op: &'static str, iface: &str) -> CellsimError {
    CellsimError::Socket {
        op,
        iface: iface.to_string(),
        source: io::Error::last_os_error(),
    }
}
