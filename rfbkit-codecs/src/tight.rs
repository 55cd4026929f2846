//! Tight encoding: zlib/JPEG compression with pixel filters.
//!
//! Every rectangle opens with a compression-control byte. Its low four bits
//! request resets of the four per-connection zlib streams; the high nibble
//! selects the operation:
//!
//! - `0x0..=0x7` - **Basic**: bits 4-5 pick the zlib stream, bit 6 announces
//!   an explicit filter byte (Copy, Palette, or Gradient; Copy is the
//!   default). Payloads under 12 bytes travel literally; larger payloads are
//!   a compact length followed by zlib data whose sliding-window history
//!   persists across rectangles until reset.
//! - `0x8` - **Fill**: a single TPIXEL paints the whole rectangle.
//! - `0x9` - **JPEG**: a compact length and a JPEG image of the rectangle.
//! - `0xA` - **Tight-PNG**: optional; not implemented here.
//!
//! TPIXEL is the compact 3-byte R,G,B pixel form used whenever depth is 24
//! in 32-bit storage with all channel maxima at 255.
//!
//! The compact length is 1-3 bytes of little-endian 7-bit groups with a
//! continuation bit, covering values below 2^22.

use crate::{parse_tight_pixel, read_tight_pixel, DecodeContext};
use flate2::{Decompress, FlushDecompress, Status};
use rfbkit_common::{Rect, Result, RfbError};
use rfbkit_pixels::Rgba;
use rfbkit_wire::{Rectangle, WireReader, WireWriter};
use tokio::io::{AsyncRead, AsyncWrite};

const COMPRESSION_FILL: u8 = 0x8;
const COMPRESSION_JPEG: u8 = 0x9;
const COMPRESSION_PNG: u8 = 0xA;

const EXPLICIT_FILTER: u8 = 0x40;
const FILTER_COPY: u8 = 0;
const FILTER_PALETTE: u8 = 1;
const FILTER_GRADIENT: u8 = 2;

/// Payloads below this size are sent literally, never zlib-compressed.
const MIN_BYTES_TO_COMPRESS: usize = 12;

/// Compact lengths carry at most 22 bits.
pub const MAX_COMPACT_LENGTH: usize = (1 << 22) - 1;

/// The Tight decoder and its four persistent zlib streams.
///
/// A stream's sliding-window history survives across rectangles for the whole
/// session; it is dropped only when the server sets the matching reset bit in
/// a compression-control byte.
pub struct TightCodec {
    streams: [Option<Decompress>; 4],
}

impl Default for TightCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TightCodec {
    pub fn new() -> Self {
        Self {
            streams: [None, None, None, None],
        }
    }

    pub(crate) async fn decode<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        rect: &Rectangle,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let ccb = reader.read_u8().await?;
        for id in 0..4 {
            if ccb & (1 << id) != 0 {
                tracing::debug!(stream = id, ccb, "tight: resetting zlib stream");
                self.streams[id] = None;
            }
        }

        let comp_type = ccb >> 4;
        match comp_type {
            COMPRESSION_FILL => {
                let color = read_tight_pixel(reader, ctx.format, ctx.colormap).await?;
                ctx.canvas.fill_rect(rect_bounds(rect), color)
            }
            COMPRESSION_JPEG => self.decode_jpeg(reader, rect, ctx).await,
            COMPRESSION_PNG => Err(RfbError::UnsupportedFormat(
                "Tight-PNG sub-encoding is not implemented".into(),
            )),
            t if t & 0x8 == 0 => self.decode_basic(reader, rect, ctx, ccb).await,
            other => Err(RfbError::protocol(format!(
                "invalid tight compression type {other:#x}"
            ))),
        }
    }

    async fn decode_basic<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        rect: &Rectangle,
        ctx: &mut DecodeContext<'_>,
        ccb: u8,
    ) -> Result<()> {
        let stream_id = ((ccb >> 4) & 0x3) as usize;
        let filter = if ccb & EXPLICIT_FILTER != 0 {
            reader.read_u8().await?
        } else {
            FILTER_COPY
        };

        let width = rect.width as usize;
        let height = rect.height as usize;
        let bpp = ctx.format.tight_bytes_per_pixel();

        match filter {
            FILTER_COPY => {
                let data = self
                    .read_payload(reader, stream_id, width * height * bpp)
                    .await?;
                let mut row = Vec::with_capacity(width);
                for y in 0..height {
                    row.clear();
                    for raw in data[y * width * bpp..(y + 1) * width * bpp].chunks_exact(bpp) {
                        row.push(parse_tight_pixel(raw, ctx.format, ctx.colormap)?);
                    }
                    ctx.canvas
                        .put_row(rect.x as u32, rect.y as u32 + y as u32, &row)?;
                }
                Ok(())
            }
            FILTER_PALETTE => {
                self.decode_palette(reader, rect, ctx, stream_id, bpp).await
            }
            FILTER_GRADIENT => {
                self.decode_gradient(reader, rect, ctx, stream_id, bpp).await
            }
            other => Err(RfbError::protocol(format!(
                "invalid tight filter id {other}"
            ))),
        }
    }

    async fn decode_palette<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        rect: &Rectangle,
        ctx: &mut DecodeContext<'_>,
        stream_id: usize,
        bpp: usize,
    ) -> Result<()> {
        let color_count = reader.read_u8().await? as usize + 1;
        if color_count < 2 {
            return Err(RfbError::protocol(
                "tight palette needs at least 2 colors".to_owned(),
            ));
        }

        let raw_palette = reader.read_vec(color_count * bpp).await?;
        let palette = raw_palette
            .chunks_exact(bpp)
            .map(|raw| parse_tight_pixel(raw, ctx.format, ctx.colormap))
            .collect::<Result<Vec<Rgba>>>()?;

        let width = rect.width as usize;
        let height = rect.height as usize;
        // Two-color palettes pack one bit per pixel, MSB first, each row
        // padded to a whole byte; larger palettes use one index byte each.
        let row_stride = if color_count == 2 {
            width.div_ceil(8)
        } else {
            width
        };
        let data = self
            .read_payload(reader, stream_id, row_stride * height)
            .await?;

        let mut row = Vec::with_capacity(width);
        for y in 0..height {
            row.clear();
            for x in 0..width {
                let index = if color_count == 2 {
                    ((data[y * row_stride + x / 8] >> (7 - (x % 8))) & 1) as usize
                } else {
                    data[y * row_stride + x] as usize
                };
                let color = *palette.get(index).ok_or_else(|| {
                    RfbError::protocol(format!(
                        "tight palette index {index} out of range (palette has {color_count})"
                    ))
                })?;
                row.push(color);
            }
            ctx.canvas
                .put_row(rect.x as u32, rect.y as u32 + y as u32, &row)?;
        }
        Ok(())
    }

    /// Gradient filter: residuals against the predictor
    /// `clamp(above + left - upper_left, 0, 255)` per channel, with zero
    /// borders on row 0 and column 0; the decoded value is predictor plus
    /// residual modulo 256.
    async fn decode_gradient<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        rect: &Rectangle,
        ctx: &mut DecodeContext<'_>,
        stream_id: usize,
        bpp: usize,
    ) -> Result<()> {
        if bpp != 3 {
            return Err(RfbError::UnsupportedFormat(format!(
                "tight gradient filter requires the 3-byte compact pixel form, format has {bpp}"
            )));
        }

        let width = rect.width as usize;
        let height = rect.height as usize;
        let data = self
            .read_payload(reader, stream_id, width * height * 3)
            .await?;

        let mut prev_row = vec![0u8; width * 3];
        let mut this_row = vec![0u8; width * 3];
        let mut row = Vec::with_capacity(width);

        for y in 0..height {
            for x in 0..width {
                for c in 0..3 {
                    let above = prev_row[x * 3 + c] as i32;
                    let (left, upper_left) = if x > 0 {
                        (this_row[(x - 1) * 3 + c] as i32, prev_row[(x - 1) * 3 + c] as i32)
                    } else {
                        (0, 0)
                    };
                    let predicted = (above + left - upper_left).clamp(0, 255) as u8;
                    this_row[x * 3 + c] = predicted.wrapping_add(data[(y * width + x) * 3 + c]);
                }
            }

            row.clear();
            for x in 0..width {
                row.push(Rgba::rgb(
                    this_row[x * 3],
                    this_row[x * 3 + 1],
                    this_row[x * 3 + 2],
                ));
            }
            ctx.canvas
                .put_row(rect.x as u32, rect.y as u32 + y as u32, &row)?;

            std::mem::swap(&mut prev_row, &mut this_row);
        }
        Ok(())
    }

    async fn decode_jpeg<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        rect: &Rectangle,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<()> {
        let length = read_compact_length(reader).await?;
        let data = reader.read_vec(length).await?;

        let mut decoder = jpeg_decoder::Decoder::new(std::io::Cursor::new(&data[..]));
        let pixels = decoder
            .decode()
            .map_err(|err| RfbError::Decompression(format!("tight jpeg: {err}")))?;
        let info = decoder
            .info()
            .ok_or_else(|| RfbError::Decompression("tight jpeg: missing metadata".into()))?;

        if info.width != rect.width || info.height != rect.height {
            return Err(RfbError::protocol(format!(
                "tight jpeg is {}x{} but the rectangle is {}x{}",
                info.width, info.height, rect.width, rect.height
            )));
        }
        if info.pixel_format != jpeg_decoder::PixelFormat::RGB24 {
            return Err(RfbError::UnsupportedFormat(format!(
                "tight jpeg pixel format {:?}",
                info.pixel_format
            )));
        }

        let width = rect.width as usize;
        let mut row = Vec::with_capacity(width);
        for y in 0..rect.height as usize {
            row.clear();
            for raw in pixels[y * width * 3..(y + 1) * width * 3].chunks_exact(3) {
                row.push(Rgba::rgb(raw[0], raw[1], raw[2]));
            }
            ctx.canvas
                .put_row(rect.x as u32, rect.y as u32 + y as u32, &row)?;
        }
        Ok(())
    }

    /// Read a filter payload: literal when below the compression threshold,
    /// otherwise a compact length plus zlib data for `stream_id`.
    async fn read_payload<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        stream_id: usize,
        expected: usize,
    ) -> Result<Vec<u8>> {
        if expected < MIN_BYTES_TO_COMPRESS {
            return Ok(reader.read_vec(expected).await?);
        }
        let compressed_len = read_compact_length(reader).await?;
        let compressed = reader.read_vec(compressed_len).await?;
        self.inflate(stream_id, &compressed, expected)
    }

    fn inflate(&mut self, stream_id: usize, compressed: &[u8], expected: usize) -> Result<Vec<u8>> {
        let stream = self.streams[stream_id].get_or_insert_with(|| Decompress::new(true));

        let mut out = vec![0u8; expected];
        let mut in_pos = 0;
        let mut out_pos = 0;
        while out_pos < expected {
            let before_in = stream.total_in();
            let before_out = stream.total_out();
            let status = stream
                .decompress(&compressed[in_pos..], &mut out[out_pos..], FlushDecompress::Sync)
                .map_err(|err| {
                    RfbError::Decompression(format!("tight stream {stream_id}: {err}"))
                })?;
            let consumed = (stream.total_in() - before_in) as usize;
            let produced = (stream.total_out() - before_out) as usize;
            in_pos += consumed;
            out_pos += produced;

            if in_pos >= compressed.len()
                || matches!(status, Status::StreamEnd)
                || (consumed == 0 && produced == 0)
            {
                break;
            }
        }

        if out_pos != expected {
            return Err(RfbError::Decompression(format!(
                "tight stream {stream_id} produced {out_pos} bytes, expected {expected}"
            )));
        }
        Ok(out)
    }
}

fn rect_bounds(rect: &Rectangle) -> Rect {
    Rect::new(
        rect.x as i32,
        rect.y as i32,
        rect.width as u32,
        rect.height as u32,
    )
}

/// Read a Tight compact length: 1-3 bytes of little-endian 7-bit groups with
/// a continuation bit in the MSB of each byte (the third byte contributes a
/// full 8 bits).
pub async fn read_compact_length<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
) -> Result<usize> {
    let b0 = reader.read_u8().await?;
    let mut length = (b0 & 0x7F) as usize;
    if b0 & 0x80 == 0 {
        return Ok(length);
    }

    let b1 = reader.read_u8().await?;
    length |= ((b1 & 0x7F) as usize) << 7;
    if b1 & 0x80 == 0 {
        return Ok(length);
    }

    let b2 = reader.read_u8().await?;
    length |= (b2 as usize) << 14;
    Ok(length)
}

/// Write a Tight compact length. `length` must stay below 2^22.
pub fn write_compact_length<W: AsyncWrite + Unpin>(writer: &mut WireWriter<W>, length: usize) {
    debug_assert!(length <= MAX_COMPACT_LENGTH);
    let mut b0 = (length & 0x7F) as u8;
    if length > 0x7F {
        b0 |= 0x80;
        writer.write_u8(b0);
        let mut b1 = ((length >> 7) & 0x7F) as u8;
        if length > 0x3FFF {
            b1 |= 0x80;
            writer.write_u8(b1);
            writer.write_u8(((length >> 14) & 0xFF) as u8);
        } else {
            writer.write_u8(b1);
        }
    } else {
        writer.write_u8(b0);
    }
}
