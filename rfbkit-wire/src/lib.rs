//! RFB wire protocol layer.
//!
//! This crate provides the protocol plumbing beneath the codec and session
//! layers:
//!
//! - [`stream`] - buffered big-endian readers/writers over any tokio duplex
//! - [`handshake`] - version/security/init negotiation for the client role,
//!   plus the server role's wire halves
//! - [`security`] - security types and the VNC DES challenge-response
//! - [`messages`] - typed client and server messages with symmetric
//!   `read_from`/`write_to`
//!
//! The crate never owns a socket: everything is generic over
//! `AsyncRead`/`AsyncWrite`, so callers can hand it a TCP stream, a TLS
//! session, or an in-process duplex.

pub mod handshake;
pub mod messages;
pub mod security;
pub mod stream;

pub use handshake::{negotiate_security, negotiate_version, ProtocolVersion};
pub use messages::{ClientMessage, Rectangle, ServerInit, ServerMessage};
pub use security::SecurityKind;
pub use stream::{WireReader, WireWriter};
