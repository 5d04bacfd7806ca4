//! IRC chat session: wire transport, registration handshake, and the
//! receive/send loop with transparent reconnect.
//!
//! The session task is the only owner of the connection. Everything else in
//! the process sends through [`session::ChatHandle`], which funnels lines
//! into a single-writer channel so webhook dispatch and chat-triggered
//! replies never interleave on the socket.

pub mod connector;
pub mod handshake;
pub mod session;
pub mod wire;

pub use connector::ChatConnector;
pub use session::{ChatHandle, ChatSession};
pub use wire::{Dialer, TlsDialer, WireReader, WireWriter};
