//! Real-interface I/O for the cellsim emulator.
//!
//! [`PacketSocket`] binds a raw `AF_PACKET` socket to a named interface and
//! moves opaque L2 frames; [`Select`] multiplexes readiness over the two
//! sockets with a millisecond timeout. Both report failures through
//! [`cellsim_core::Result`].

mod select;
mod socket;

// --- public API
pub use select::Select;
pub use socket::PacketSocket;
