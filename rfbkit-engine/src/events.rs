//! The event/command surface between the engine and the host application.
//!
//! The sink interface is a channel of [`SessionEvent`]s delivered in wire
//! order per connection; the source interface is a channel of
//! [`SessionCommand`]s serialized by the writer task. A callback-based sink
//! can be layered over the event channel without changing ordering.

use bytes::Bytes;
use rfbkit_codecs::CursorShape;
use rfbkit_common::Rect;
use rfbkit_pixels::PixelFormat;

/// Events the engine delivers to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake finished; the canvas exists with these dimensions.
    Connected {
        width: u16,
        height: u16,
        /// Desktop name bytes from ServerInit.
        name: Vec<u8>,
        /// The pixel format updates will arrive in.
        format: PixelFormat,
    },

    /// A framebuffer update was applied in full. The canvas holds the new
    /// frame; `damage` lists the changed regions in wire order. Partial
    /// frames are never announced.
    FrameUpdated { damage: Vec<Rect> },

    /// The server rang the bell.
    Bell,

    /// Clipboard bytes from the server.
    CutText(Bytes),

    /// The server installed colormap entries.
    ColormapChanged { first_color: u16, count: u16 },

    /// A new client-side cursor image.
    CursorShape(CursorShape),

    /// The server moved the cursor.
    CursorMoved { x: u16, y: u16 },

    /// The framebuffer changed size; the canvas has been resized.
    DesktopResized { width: u16, height: u16 },

    /// A fatal error. Reported at most once, immediately before the session
    /// tears down.
    Error { message: String },

    /// The session ended. Follows either an `Error` or a clean close.
    Closed,
}

/// Commands the application sends to the server through the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Ask for an update of `area` (the whole framebuffer when `None`).
    RequestUpdate {
        incremental: bool,
        area: Option<Rect>,
    },

    /// Pointer position plus button mask.
    Pointer { x: u16, y: u16, buttons: u8 },

    /// Key press or release by X11 keysym.
    Key { keysym: u32, down: bool },

    /// Send clipboard bytes to the server.
    CutText(Bytes),

    /// Close the session. This is the clean-shutdown path: no error is
    /// surfaced and `Closed` is the final event.
    Close,
}
