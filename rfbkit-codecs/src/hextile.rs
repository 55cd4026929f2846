//! Hextile encoding: 16x16 tiles with per-tile sub-encodings.
//!
//! The rectangle is split into 16x16 tiles, row-major, left-to-right then
//! top-to-bottom, with edge tiles clipped. Each tile opens with a mask byte:
//!
//! - `Raw` (1): the tile's pixels follow uncompressed; other bits ignored
//! - `BackgroundSpecified` (2): a new background pixel follows
//! - `ForegroundSpecified` (4): a new foreground pixel follows
//! - `AnySubrects` (8): a u8 count and that many sub-rectangles follow
//! - `SubrectsColored` (16): each sub-rectangle carries its own pixel
//!
//! Background and foreground persist across tiles within one rectangle only.
//! Sub-rectangle geometry packs into two bytes: `x<<4 | y`, then
//! `(w-1)<<4 | (h-1)`.

use crate::{read_pixel, DecodeContext};
use rfbkit_common::{Rect, Result, RfbError};
use rfbkit_pixels::Rgba;
use rfbkit_wire::{Rectangle, WireReader};
use tokio::io::AsyncRead;

const RAW: u8 = 1 << 0;
const BACKGROUND_SPECIFIED: u8 = 1 << 1;
const FOREGROUND_SPECIFIED: u8 = 1 << 2;
const ANY_SUBRECTS: u8 = 1 << 3;
const SUBRECTS_COLORED: u8 = 1 << 4;

const TILE_SIZE: u16 = 16;

pub(crate) async fn decode<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    rect: &Rectangle,
    ctx: &mut DecodeContext<'_>,
) -> Result<()> {
    if rect.width == 0 || rect.height == 0 {
        return Ok(());
    }

    // Background and foreground carry across tiles of this rectangle.
    let mut background: Option<Rgba> = None;
    let mut foreground: Option<Rgba> = None;

    let mut ty = 0u16;
    while ty < rect.height {
        let tile_h = TILE_SIZE.min(rect.height - ty);
        let mut tx = 0u16;
        while tx < rect.width {
            let tile_w = TILE_SIZE.min(rect.width - tx);
            let tile_x = rect.x as u32 + tx as u32;
            let tile_y = rect.y as u32 + ty as u32;

            let mask = reader.read_u8().await?;

            if mask & RAW != 0 {
                // Raw tile: pixels row-major, remaining mask bits ignored.
                let mut row = Vec::with_capacity(tile_w as usize);
                for y in 0..tile_h {
                    row.clear();
                    for _ in 0..tile_w {
                        row.push(read_pixel(reader, ctx.format, ctx.colormap).await?);
                    }
                    ctx.canvas.put_row(tile_x, tile_y + y as u32, &row)?;
                }
                tx += TILE_SIZE;
                continue;
            }

            if mask & BACKGROUND_SPECIFIED != 0 {
                background = Some(read_pixel(reader, ctx.format, ctx.colormap).await?);
            }
            let bg = background.ok_or_else(|| {
                RfbError::protocol(format!(
                    "hextile tile ({tx}, {ty}) needs a background but none was ever specified"
                ))
            })?;
            ctx.canvas.fill_rect(
                Rect::new(tile_x as i32, tile_y as i32, tile_w as u32, tile_h as u32),
                bg,
            )?;

            if mask & FOREGROUND_SPECIFIED != 0 {
                foreground = Some(read_pixel(reader, ctx.format, ctx.colormap).await?);
            }

            if mask & ANY_SUBRECTS != 0 {
                let count = reader.read_u8().await?;
                let colored = mask & SUBRECTS_COLORED != 0;
                for i in 0..count {
                    let color = if colored {
                        read_pixel(reader, ctx.format, ctx.colormap).await?
                    } else {
                        foreground.ok_or_else(|| {
                            RfbError::protocol(format!(
                                "hextile tile ({tx}, {ty}) has plain subrects but no foreground"
                            ))
                        })?
                    };

                    let xy = reader.read_u8().await?;
                    let wh = reader.read_u8().await?;
                    let sx = (xy >> 4) as u16;
                    let sy = (xy & 0x0F) as u16;
                    let sw = ((wh >> 4) as u16) + 1;
                    let sh = ((wh & 0x0F) as u16) + 1;

                    if sx + sw > tile_w || sy + sh > tile_h {
                        return Err(RfbError::protocol(format!(
                            "hextile subrect {i} ({sx},{sy} {sw}x{sh}) escapes its {tile_w}x{tile_h} tile at ({tx}, {ty})"
                        )));
                    }

                    ctx.canvas.fill_rect(
                        Rect::new(
                            (tile_x + sx as u32) as i32,
                            (tile_y + sy as u32) as i32,
                            sw as u32,
                            sh as u32,
                        ),
                        color,
                    )?;
                }
            }

            tx += TILE_SIZE;
        }
        ty += TILE_SIZE;
    }

    Ok(())
}
