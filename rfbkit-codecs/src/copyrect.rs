//! CopyRect encoding: copy a region of the canvas to another position.
//!
//! Only 4 payload bytes travel regardless of rectangle size: the source x/y.
//! The rectangle header names the destination. Overlapping source and
//! destination are legal and must behave as if copied through a temporary.

use crate::DecodeContext;
use rfbkit_common::{Point, Rect, Result, RfbError};
use rfbkit_wire::{Rectangle, WireReader};
use tokio::io::AsyncRead;

pub(crate) async fn decode<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    rect: &Rectangle,
    ctx: &mut DecodeContext<'_>,
) -> Result<()> {
    if rect.width == 0 || rect.height == 0 {
        return Ok(());
    }

    let src_x = reader.read_u16().await?;
    let src_y = reader.read_u16().await?;

    let src = Rect::new(
        src_x as i32,
        src_y as i32,
        rect.width as u32,
        rect.height as u32,
    );
    let dst = Point::new(rect.x as i32, rect.y as i32);

    // The canvas rejects out-of-bounds source or destination; surface that
    // as the protocol violation it is.
    ctx.canvas.blit(src, dst).map_err(|err| match err {
        RfbError::Protocol(msg) => RfbError::Protocol(format!("CopyRect: {msg}")),
        other => other,
    })
}
