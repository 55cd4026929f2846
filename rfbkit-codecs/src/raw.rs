//! Raw encoding: uncompressed pixels in the connection's wire format.
//!
//! The payload is exactly `width * height * bytes_per_pixel` bytes, row-major
//! top to bottom. An empty rectangle consumes nothing but is still
//! dispatched.

use crate::{read_pixel, DecodeContext};
use rfbkit_common::Result;
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

    let width = rect.width as usize;
    let mut row = Vec::with_capacity(width);
    for y in 0..rect.height {
        row.clear();
        for _ in 0..width {
            row.push(read_pixel(reader, ctx.format, ctx.colormap).await?);
        }
        ctx.canvas
            .put_row(rect.x as u32, rect.y as u32 + y as u32, &row)?;
    }
    Ok(())
}
