//! Typed RFB protocol messages.
//!
//! Messages are grouped by direction:
//! - [`client`] - client-to-server messages (SetPixelFormat, SetEncodings,
//!   FramebufferUpdateRequest, KeyEvent, PointerEvent, ClientCutText)
//! - [`server`] - server-to-client messages (FramebufferUpdate,
//!   SetColorMapEntries, Bell, ServerCutText)
//! - [`types`] - the rectangle header and pixel-format wire glue shared by
//!   both directions
//!
//! Every message carries symmetric `read_from`/`write_to` halves so the same
//! types serve the client role and the server role. All multibyte integers
//! are big-endian; padding bytes are required by the protocol but ignored on
//! read and zeroed on write. An unknown inbound message type tag is a fatal
//! protocol violation.

pub mod client;
pub mod server;
pub mod types;

#[cfg(test)]
mod proptest_framing;

pub use client::{
    ClientCutText, ClientInit, ClientMessage, FramebufferUpdateRequest, KeyEvent, PointerEvent,
    SetEncodings, SetPixelFormat,
};
pub use server::{Bell, ServerCutText, ServerInit, ServerMessage, SetColorMapEntries};
pub use types::{read_pixel_format, write_pixel_format, Rectangle};
