//! Pseudo-encodings: rectangles that carry metadata instead of pixels.
//!
//! - **Cursor shape**: `width * height` pixels in the connection's wire
//!   format followed by a 1-bit transparency mask of the same dimensions,
//!   each mask row padded to whole bytes. The rectangle's x/y are the
//!   hotspot. Updates client-side cursor state, never the canvas.
//! - **Cursor position**: no payload; the position is the rectangle's x/y.
//! - **Desktop size**: the rectangle's width/height are the new framebuffer
//!   size. The canvas is resized between rectangles, keeping the top-left
//!   content and filling newly exposed area with black.

use crate::{read_pixel, CursorShape, DecodeContext, PseudoEvent};
use rfbkit_common::Result;
use rfbkit_wire::{Rectangle, WireReader};
use tokio::io::AsyncRead;

pub(crate) async fn decode_cursor_shape<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    rect: &Rectangle,
    ctx: &mut DecodeContext<'_>,
) -> Result<PseudoEvent> {
    let width = rect.width as usize;
    let height = rect.height as usize;

    let mut pixels = Vec::with_capacity(width * height);
    for _ in 0..width * height {
        pixels.push(read_pixel(reader, ctx.format, ctx.colormap).await?);
    }
    let mask = reader.read_vec(width.div_ceil(8) * height).await?;

    Ok(PseudoEvent::CursorShape(CursorShape {
        width: rect.width,
        height: rect.height,
        hotspot_x: rect.x,
        hotspot_y: rect.y,
        pixels,
        mask,
    }))
}

pub(crate) fn cursor_position(rect: &Rectangle) -> PseudoEvent {
    PseudoEvent::CursorMoved {
        x: rect.x,
        y: rect.y,
    }
}

pub(crate) fn desktop_resize(rect: &Rectangle, ctx: &mut DecodeContext<'_>) -> PseudoEvent {
    ctx.canvas.resize(rect.width as u32, rect.height as u32);
    PseudoEvent::DesktopResized {
        width: rect.width,
        height: rect.height,
    }
}
