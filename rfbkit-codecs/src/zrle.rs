//! ZRLE encoding: zlib-wrapped run-length coding in 64x64 tiles.
//!
//! Each rectangle carries a u32 length and that many bytes belonging to one
//! continuous zlib stream whose history persists across rectangles for the
//! whole session. The decompressed data is a sequence of tiles, row-major,
//! each opening with a sub-encoding byte:
//!
//! - 0: raw CPIXELs in raster order
//! - 1: solid fill, one CPIXEL
//! - 2-16: packed palette, indices at 1/2/4 bits per pixel, MSB first,
//!   rows padded to whole bytes
//! - 17-127: reserved
//! - 128: plain RLE, `(CPIXEL, run length)` pairs covering the tile exactly
//! - 129: reserved
//! - 130-255: palette RLE with palette size `sub - 128`
//!
//! A run length is 1 plus the sum of bytes read until one is not 0xFF, e.g.
//! `0xFF 0xFF 0x03` is 1 + 255 + 255 + 3 = 514. Runs never cross a tile
//! boundary; a run that would is a protocol violation.
//!
//! CPIXEL is the compact 3-byte R,G,B form under the same condition as
//! Tight's TPIXEL (depth 24 in 32-bit storage).

use crate::{parse_tight_pixel, DecodeContext};
use flate2::{Decompress, FlushDecompress, Status};
use rfbkit_common::{Rect, Result, RfbError};
use rfbkit_pixels::{Colormap, PixelFormat, Rgba};
use rfbkit_wire::{Rectangle, WireReader};
use tokio::io::AsyncRead;

const TILE_SIZE: u16 = 64;

/// The ZRLE decoder and its session-wide zlib stream.
pub struct ZrleCodec {
    inflater: Decompress,
}

impl Default for ZrleCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ZrleCodec {
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
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

        let compressed_len = reader.read_u32().await? as usize;
        let compressed = reader.read_vec(compressed_len).await?;
        let data = self.inflate(&compressed)?;
        tracing::trace!(
            compressed = compressed_len,
            inflated = data.len(),
            "zrle rectangle"
        );

        let mut cursor = ByteCursor::new(&data);

        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = TILE_SIZE.min(rect.height - ty);
            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = TILE_SIZE.min(rect.width - tx);
                decode_tile(
                    &mut cursor,
                    (rect.x as u32 + tx as u32, rect.y as u32 + ty as u32),
                    (tile_w, tile_h),
                    ctx,
                )?;
                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        if cursor.remaining() > 0 {
            return Err(RfbError::protocol(format!(
                "zrle rectangle carried {} bytes beyond its last tile",
                cursor.remaining()
            )));
        }
        Ok(())
    }

    /// Feed one rectangle's bytes through the persistent inflater.
    ///
    /// The first rectangle of a session carries the zlib header; later
    /// rectangles are continuation data for the same stream.
    fn inflate(&mut self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut in_pos = 0;

        while in_pos < compressed.len() {
            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(&compressed[in_pos..], &mut chunk, FlushDecompress::Sync)
                .map_err(|err| RfbError::Decompression(format!("zrle stream: {err}")))?;
            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            in_pos += consumed;
            output.extend_from_slice(&chunk[..produced]);

            match status {
                Status::StreamEnd => break,
                _ if consumed == 0 && produced == 0 => {
                    return Err(RfbError::Decompression(
                        "zrle stream stalled without progress".into(),
                    ));
                }
                _ => {}
            }
        }
        Ok(output)
    }
}

fn decode_tile(
    cursor: &mut ByteCursor<'_>,
    (tile_x, tile_y): (u32, u32),
    (tile_w, tile_h): (u16, u16),
    ctx: &mut DecodeContext<'_>,
) -> Result<()> {
    let area = tile_w as usize * tile_h as usize;
    let sub = cursor.read_u8()?;
    let rle = sub & 0x80 != 0;
    let palette_size = (sub & 0x7F) as usize;

    match (rle, palette_size) {
        (false, 0) => {
            // Raw CPIXELs in raster order.
            let mut pixels = Vec::with_capacity(area);
            for _ in 0..area {
                pixels.push(read_cpixel(cursor, ctx.format, ctx.colormap)?);
            }
            write_tile(ctx, (tile_x, tile_y), (tile_w, tile_h), &pixels)
        }
        (false, 1) => {
            // Solid tile.
            let color = read_cpixel(cursor, ctx.format, ctx.colormap)?;
            ctx.canvas.fill_rect(
                Rect::new(tile_x as i32, tile_y as i32, tile_w as u32, tile_h as u32),
                color,
            )
        }
        (false, 2..=16) => {
            let palette = read_palette(cursor, palette_size, ctx.format, ctx.colormap)?;
            let bits = match palette_size {
                2 => 1,
                3..=4 => 2,
                _ => 4,
            };
            let row_stride = (tile_w as usize * bits).div_ceil(8);

            let mut pixels = Vec::with_capacity(area);
            for _ in 0..tile_h {
                let packed = cursor.read_slice(row_stride)?;
                let mut bit_pos = 0usize;
                for _ in 0..tile_w {
                    let byte = packed[bit_pos / 8];
                    let shift = 8 - bits - (bit_pos % 8);
                    let index = ((byte >> shift) & ((1 << bits) - 1)) as usize;
                    let color = *palette.get(index).ok_or_else(|| {
                        RfbError::protocol(format!(
                            "zrle packed index {index} out of range (palette has {palette_size})"
                        ))
                    })?;
                    pixels.push(color);
                    bit_pos += bits;
                }
            }
            write_tile(ctx, (tile_x, tile_y), (tile_w, tile_h), &pixels)
        }
        (false, 17..=127) | (true, 1) => Err(RfbError::protocol(format!(
            "reserved zrle sub-encoding {sub}"
        ))),
        (true, 0) => {
            // Plain RLE: (CPIXEL, run) pairs covering the tile exactly.
            let mut pixels = Vec::with_capacity(area);
            while pixels.len() < area {
                let color = read_cpixel(cursor, ctx.format, ctx.colormap)?;
                let run = read_run_length(cursor)?;
                if pixels.len() + run > area {
                    return Err(RfbError::protocol(format!(
                        "zrle run of {run} overruns the tile ({} of {area} pixels remain)",
                        area - pixels.len()
                    )));
                }
                pixels.extend(std::iter::repeat(color).take(run));
            }
            write_tile(ctx, (tile_x, tile_y), (tile_w, tile_h), &pixels)
        }
        (true, 2..=127) => {
            // Palette RLE: high bit of the index byte announces a run.
            let palette = read_palette(cursor, palette_size, ctx.format, ctx.colormap)?;
            let mut pixels = Vec::with_capacity(area);
            while pixels.len() < area {
                let code = cursor.read_u8()?;
                let (index, run) = if code & 0x80 == 0 {
                    (code as usize, 1)
                } else {
                    ((code & 0x7F) as usize, read_run_length(cursor)?)
                };
                let color = *palette.get(index).ok_or_else(|| {
                    RfbError::protocol(format!(
                        "zrle palette-rle index {index} out of range (palette has {palette_size})"
                    ))
                })?;
                if pixels.len() + run > area {
                    return Err(RfbError::protocol(format!(
                        "zrle run of {run} overruns the tile ({} of {area} pixels remain)",
                        area - pixels.len()
                    )));
                }
                pixels.extend(std::iter::repeat(color).take(run));
            }
            write_tile(ctx, (tile_x, tile_y), (tile_w, tile_h), &pixels)
        }
        _ => unreachable!("palette size is 7 bits"),
    }
}

fn write_tile(
    ctx: &mut DecodeContext<'_>,
    (tile_x, tile_y): (u32, u32),
    (tile_w, tile_h): (u16, u16),
    pixels: &[Rgba],
) -> Result<()> {
    for y in 0..tile_h as usize {
        ctx.canvas.put_row(
            tile_x,
            tile_y + y as u32,
            &pixels[y * tile_w as usize..(y + 1) * tile_w as usize],
        )?;
    }
    Ok(())
}

fn read_cpixel(
    cursor: &mut ByteCursor<'_>,
    format: &PixelFormat,
    colormap: &Colormap,
) -> Result<Rgba> {
    let width = if format.is_compact() {
        3
    } else {
        format.bytes_per_pixel()
    };
    let raw = cursor.read_slice(width)?;
    parse_tight_pixel(raw, format, colormap)
}

fn read_palette(
    cursor: &mut ByteCursor<'_>,
    size: usize,
    format: &PixelFormat,
    colormap: &Colormap,
) -> Result<Vec<Rgba>> {
    let mut palette = Vec::with_capacity(size);
    for _ in 0..size {
        palette.push(read_cpixel(cursor, format, colormap)?);
    }
    Ok(palette)
}

/// Run length: 1 plus the sum of bytes up to and including the first
/// non-0xFF byte.
fn read_run_length(cursor: &mut ByteCursor<'_>) -> Result<usize> {
    let mut length = 1usize;
    loop {
        let byte = cursor.read_u8()?;
        length += byte as usize;
        if byte != 0xFF {
            return Ok(length);
        }
    }
}

/// Cursor over the inflated tile data. Running out of bytes mid-tile means
/// the framing disagrees with the tile geometry, which is a protocol
/// violation rather than an I/O failure.
struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        let slice = self.read_slice(1)?;
        Ok(slice[0])
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(RfbError::protocol(format!(
                "zrle tile data truncated: wanted {len} bytes, {} remain",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ENCODING_ZRLE;
    use flate2::{Compress, Compression, FlushCompress};
    use rfbkit_pixels::Canvas;
    use std::io::Cursor;

    fn rect(x: u16, y: u16, w: u16, h: u16) -> Rectangle {
        Rectangle {
            x,
            y,
            width: w,
            height: h,
            encoding: ENCODING_ZRLE,
        }
    }

    /// Wrap a tile payload as one wire rectangle: u32 length + zlib chunk
    /// from the given compressor (kept across calls for continuation tests).
    fn wire_chunk(compressor: &mut Compress, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; payload.len() * 2 + 128];
        let before_out = compressor.total_out();
        let before_in = compressor.total_in();
        compressor
            .compress(payload, &mut out, FlushCompress::Sync)
            .unwrap();
        assert_eq!((compressor.total_in() - before_in) as usize, payload.len());
        out.truncate((compressor.total_out() - before_out) as usize);

        let mut wire = (out.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&out);
        wire
    }

    fn compressor() -> Compress {
        Compress::new(Compression::default(), true)
    }

    async fn run(codec: &mut ZrleCodec, wire: Vec<u8>, r: &Rectangle, canvas: &mut Canvas) -> Result<()> {
        let format = PixelFormat::rgb888();
        let colormap = Colormap::new();
        let mut ctx = DecodeContext {
            format: &format,
            colormap: &colormap,
            canvas,
        };
        let mut reader = WireReader::new(Cursor::new(wire));
        codec.decode(&mut reader, r, &mut ctx).await
    }

    #[tokio::test]
    async fn test_solid_tile() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(4, 4);
        // Sub-encoding 1, one CPIXEL (compact form: 3 bytes).
        let wire = wire_chunk(&mut compressor(), &[1, 10, 20, 30]);
        run(&mut codec, wire, &rect(0, 0, 4, 4), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.get(0, 0), Some(Rgba::rgb(10, 20, 30)));
        assert_eq!(canvas.get(3, 3), Some(Rgba::rgb(10, 20, 30)));
    }

    #[tokio::test]
    async fn test_raw_tile() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(2, 2);
        let payload = vec![
            0, // raw
            1, 0, 0, /**/ 0, 1, 0, //
            0, 0, 1, /**/ 9, 9, 9,
        ];
        let wire = wire_chunk(&mut compressor(), &payload);
        run(&mut codec, wire, &rect(0, 0, 2, 2), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.get(0, 0), Some(Rgba::rgb(1, 0, 0)));
        assert_eq!(canvas.get(1, 0), Some(Rgba::rgb(0, 1, 0)));
        assert_eq!(canvas.get(0, 1), Some(Rgba::rgb(0, 0, 1)));
        assert_eq!(canvas.get(1, 1), Some(Rgba::rgb(9, 9, 9)));
    }

    #[tokio::test]
    async fn test_plain_rle_runs() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(3, 3);
        // 9 pixels: red x5 (run byte 4), blue x4 (run byte 3).
        let payload = vec![
            128, //
            200, 0, 0, 4, //
            0, 0, 200, 3,
        ];
        let wire = wire_chunk(&mut compressor(), &payload);
        run(&mut codec, wire, &rect(0, 0, 3, 3), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.get(1, 1), Some(Rgba::rgb(200, 0, 0))); // 5th pixel
        assert_eq!(canvas.get(2, 1), Some(Rgba::rgb(0, 0, 200))); // 6th pixel
        assert_eq!(canvas.get(2, 2), Some(Rgba::rgb(0, 0, 200)));
    }

    #[tokio::test]
    async fn test_rle_run_length_arithmetic() {
        // 0xFF 0xFF 0x02 -> 1 + 255 + 255 + 2 = 513 pixels of a 64x64 tile.
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(64, 64);
        let area = 64 * 64usize;
        let mut payload = vec![128, 7, 7, 7, 0xFF, 0xFF, 0x02];
        // Fill the remaining 4096 - 513 pixels with one long run:
        // remaining - 1 = 3582 = 255 * 14 + 12.
        payload.extend_from_slice(&[1, 1, 1]);
        let remaining = area - 513;
        let mut tail = remaining - 1;
        while tail >= 255 {
            payload.push(0xFF);
            tail -= 255;
        }
        payload.push(tail as u8);

        let wire = wire_chunk(&mut compressor(), &payload);
        run(&mut codec, wire, &rect(0, 0, 64, 64), &mut canvas)
            .await
            .unwrap();

        // Pixel 512 (zero-based) is the last of the first run.
        assert_eq!(canvas.get(512 % 64, 512 / 64), Some(Rgba::rgb(7, 7, 7)));
        assert_eq!(canvas.get(513 % 64, 513 / 64), Some(Rgba::rgb(1, 1, 1)));
        assert_eq!(canvas.get(63, 63), Some(Rgba::rgb(1, 1, 1)));
    }

    #[tokio::test]
    async fn test_rle_run_overrunning_tile_rejected() {
        // A 64x64 tile holds 4096 pixels; sixteen 0xFF continuation bytes
        // plus a 0xFE terminator encode 1 + 16*255 + 254 = 4335 pixels,
        // which must be rejected.
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(64, 64);
        let mut payload = vec![128, 5, 5, 5];
        payload.extend_from_slice(&[0xFF; 16]);
        payload.push(0xFE);

        let wire = wire_chunk(&mut compressor(), &payload);
        let err = run(&mut codec, wire, &rect(0, 0, 64, 64), &mut canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
        assert!(err.to_string().contains("overruns"));
    }

    #[tokio::test]
    async fn test_packed_palette_one_bit() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(4, 2);
        let c0 = [3u8, 0, 0];
        let c1 = [0u8, 3, 0];
        // Palette of 2: 1 bit per pixel, 4 wide -> 1 byte per row.
        let payload = vec![
            2, //
            c0[0], c0[1], c0[2], c1[0], c1[1], c1[2], //
            0b1010_0000, // row 0: 1,0,1,0
            0b0101_0000, // row 1: 0,1,0,1
        ];
        let wire = wire_chunk(&mut compressor(), &payload);
        run(&mut codec, wire, &rect(0, 0, 4, 2), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.get(0, 0), Some(Rgba::rgb(0, 3, 0)));
        assert_eq!(canvas.get(1, 0), Some(Rgba::rgb(3, 0, 0)));
        assert_eq!(canvas.get(0, 1), Some(Rgba::rgb(3, 0, 0)));
        assert_eq!(canvas.get(1, 1), Some(Rgba::rgb(0, 3, 0)));
    }

    #[tokio::test]
    async fn test_packed_palette_two_bits() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(5, 1);
        // Palette of 4 colors: 2 bits per pixel, 5 wide -> 2 bytes per row.
        let mut payload = vec![4];
        for c in [[1u8, 0, 0], [0, 1, 0], [0, 0, 1], [1, 1, 1]] {
            payload.extend_from_slice(&c);
        }
        // Indices 0,1,2,3,0 -> 0b00_01_10_11, 0b00_000000
        payload.push(0b0001_1011);
        payload.push(0b0000_0000);
        let wire = wire_chunk(&mut compressor(), &payload);
        run(&mut codec, wire, &rect(0, 0, 5, 1), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.get(0, 0), Some(Rgba::rgb(1, 0, 0)));
        assert_eq!(canvas.get(1, 0), Some(Rgba::rgb(0, 1, 0)));
        assert_eq!(canvas.get(2, 0), Some(Rgba::rgb(0, 0, 1)));
        assert_eq!(canvas.get(3, 0), Some(Rgba::rgb(1, 1, 1)));
        assert_eq!(canvas.get(4, 0), Some(Rgba::rgb(1, 0, 0)));
    }

    #[tokio::test]
    async fn test_palette_rle() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(6, 1);
        // Palette RLE with 2 entries: sub = 128 + 2.
        let payload = vec![
            130, //
            40, 0, 0, /**/ 0, 40, 0, // palette
            0,    // single pixel, index 0
            0x81, 3, // run: index 1, length 1 + 3 = 4
            0, // single pixel, index 0
        ];
        let wire = wire_chunk(&mut compressor(), &payload);
        run(&mut codec, wire, &rect(0, 0, 6, 1), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.get(0, 0), Some(Rgba::rgb(40, 0, 0)));
        for x in 1..5 {
            assert_eq!(canvas.get(x, 0), Some(Rgba::rgb(0, 40, 0)));
        }
        assert_eq!(canvas.get(5, 0), Some(Rgba::rgb(40, 0, 0)));
    }

    #[tokio::test]
    async fn test_reserved_sub_encodings_rejected() {
        for sub in [17u8, 127, 129] {
            let mut codec = ZrleCodec::new();
            let mut canvas = Canvas::new(2, 2);
            let wire = wire_chunk(&mut compressor(), &[sub, 0, 0, 0]);
            let err = run(&mut codec, wire, &rect(0, 0, 2, 2), &mut canvas)
                .await
                .unwrap_err();
            assert!(matches!(err, RfbError::Protocol(_)), "sub={sub}");
        }
    }

    #[tokio::test]
    async fn test_multiple_tiles_row_major() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(100, 1);
        // 100x1: two tiles, 64x1 and 36x1, both solid.
        let mut payload = vec![1, 50, 0, 0];
        payload.extend_from_slice(&[1, 0, 50, 0]);
        let wire = wire_chunk(&mut compressor(), &payload);
        run(&mut codec, wire, &rect(0, 0, 100, 1), &mut canvas)
            .await
            .unwrap();
        assert_eq!(canvas.get(63, 0), Some(Rgba::rgb(50, 0, 0)));
        assert_eq!(canvas.get(64, 0), Some(Rgba::rgb(0, 50, 0)));
        assert_eq!(canvas.get(99, 0), Some(Rgba::rgb(0, 50, 0)));
    }

    #[tokio::test]
    async fn test_stream_persists_across_rectangles() {
        // Two rectangles whose compressed bytes form one continuous zlib
        // stream; the second only inflates with the first's history.
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(4, 8);
        let mut shared = compressor();

        let wire1 = wire_chunk(&mut shared, &[1, 11, 0, 0]);
        run(&mut codec, wire1, &rect(0, 0, 4, 4), &mut canvas)
            .await
            .unwrap();

        let wire2 = wire_chunk(&mut shared, &[1, 0, 22, 0]);
        run(&mut codec, wire2, &rect(0, 4, 4, 4), &mut canvas)
            .await
            .unwrap();

        assert_eq!(canvas.get(0, 0), Some(Rgba::rgb(11, 0, 0)));
        assert_eq!(canvas.get(0, 4), Some(Rgba::rgb(0, 22, 0)));
    }

    #[tokio::test]
    async fn test_trailing_bytes_rejected() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(2, 2);
        // Solid tile plus two junk bytes inside the zlib payload.
        let wire = wire_chunk(&mut compressor(), &[1, 1, 2, 3, 0xAB, 0xCD]);
        let err = run(&mut codec, wire, &rect(0, 0, 2, 2), &mut canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_tile_data_rejected() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(2, 2);
        // Raw tile needs 12 bytes of pixels; give 3.
        let wire = wire_chunk(&mut compressor(), &[0, 1, 2, 3]);
        let err = run(&mut codec, wire, &rect(0, 0, 2, 2), &mut canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_empty_rectangle_consumes_nothing() {
        let mut codec = ZrleCodec::new();
        let mut canvas = Canvas::new(2, 2);
        run(&mut codec, Vec::new(), &rect(0, 0, 0, 2), &mut canvas)
            .await
            .unwrap();
    }
}
