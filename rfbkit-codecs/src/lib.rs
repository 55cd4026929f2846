//! Rectangle-update decoders.
//!
//! Each rectangle of a framebuffer update names an encoding by its signed
//! 32-bit tag. Positive tags are true pixel encodings; negative tags are
//! pseudo-encodings whose payload carries metadata (cursor shape, cursor
//! position, desktop size) instead of pixels.
//!
//! Codecs are modeled as the [`Codec`] tagged union - one variant per
//! encoding, each owning its per-connection state (the Tight variant its four
//! zlib streams, the ZRLE variant its persistent inflater) - held by a
//! [`CodecRegistry`] keyed by encoding tag. The registry is built from the
//! session's negotiated encodings; Raw is always present because every server
//! may fall back to it.
//!
//! Decoding a rectangle runs to completion once its bytes are buffered;
//! rectangle boundaries are the only safe cancellation points because the
//! persistent zlib history would otherwise diverge from the server.

use rfbkit_common::{RfbError, Result};
use rfbkit_pixels::{Canvas, Colormap, PixelFormat, Rgba};
use rfbkit_wire::{Rectangle, WireReader};
use std::collections::HashMap;
use tokio::io::AsyncRead;

pub mod copyrect;
pub mod hextile;
pub mod pseudo;
pub mod raw;
pub mod tight;
pub mod zrle;

pub use tight::{read_compact_length, write_compact_length, TightCodec};
pub use zrle::ZrleCodec;

/// Raw encoding: uncompressed pixels.
pub const ENCODING_RAW: i32 = 0;
/// CopyRect encoding: copy from another canvas region.
pub const ENCODING_COPY_RECT: i32 = 1;
/// Hextile encoding: 16x16 tiles with per-tile sub-encodings.
pub const ENCODING_HEXTILE: i32 = 5;
/// Tight encoding: zlib/JPEG compression with filters.
pub const ENCODING_TIGHT: i32 = 7;
/// ZRLE encoding: zlib-wrapped run-length coding in 64x64 tiles.
pub const ENCODING_ZRLE: i32 = 16;

/// Cursor-shape pseudo-encoding.
pub const ENCODING_CURSOR: i32 = -239;
/// Cursor-position pseudo-encoding.
pub const ENCODING_POINTER_POS: i32 = -232;
/// Desktop-size pseudo-encoding.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Connection state a codec borrows for the duration of one rectangle.
pub struct DecodeContext<'a> {
    pub format: &'a PixelFormat,
    pub colormap: &'a Colormap,
    pub canvas: &'a mut Canvas,
}

/// A decoded cursor image: pixels plus a 1-bit transparency mask whose rows
/// are padded to whole bytes, MSB first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorShape {
    pub width: u16,
    pub height: u16,
    pub hotspot_x: u16,
    pub hotspot_y: u16,
    pub pixels: Vec<Rgba>,
    pub mask: Vec<u8>,
}

/// Out-of-band results of decoding a pseudo-encoding rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoEvent {
    CursorShape(CursorShape),
    CursorMoved { x: u16, y: u16 },
    DesktopResized { width: u16, height: u16 },
}

/// One codec instance, tagged by the encoding it handles.
///
/// Stateful variants own their per-connection state; the registry borrows
/// them mutably per rectangle, which is the single-writer discipline the
/// canvas requires.
pub enum Codec {
    Raw,
    CopyRect,
    Hextile,
    Tight(TightCodec),
    Zrle(ZrleCodec),
    Cursor,
    CursorPosition,
    DesktopSize,
}

impl Codec {
    /// Build the codec for an encoding tag, if this engine implements it.
    pub fn for_encoding(tag: i32) -> Option<Self> {
        match tag {
            ENCODING_RAW => Some(Self::Raw),
            ENCODING_COPY_RECT => Some(Self::CopyRect),
            ENCODING_HEXTILE => Some(Self::Hextile),
            ENCODING_TIGHT => Some(Self::Tight(TightCodec::new())),
            ENCODING_ZRLE => Some(Self::Zrle(ZrleCodec::new())),
            ENCODING_CURSOR => Some(Self::Cursor),
            ENCODING_POINTER_POS => Some(Self::CursorPosition),
            ENCODING_DESKTOP_SIZE => Some(Self::DesktopSize),
            _ => None,
        }
    }

    /// The encoding tag this codec handles.
    pub fn encoding(&self) -> i32 {
        match self {
            Self::Raw => ENCODING_RAW,
            Self::CopyRect => ENCODING_COPY_RECT,
            Self::Hextile => ENCODING_HEXTILE,
            Self::Tight(_) => ENCODING_TIGHT,
            Self::Zrle(_) => ENCODING_ZRLE,
            Self::Cursor => ENCODING_CURSOR,
            Self::CursorPosition => ENCODING_POINTER_POS,
            Self::DesktopSize => ENCODING_DESKTOP_SIZE,
        }
    }

    /// Whether this codec can run against the given pixel format.
    pub fn supported(&self, format: &PixelFormat) -> bool {
        match self {
            // The gradient filter only exists for the compact pixel form,
            // but Tight as a whole works for any format.
            Self::Tight(_) | Self::Zrle(_) => format.bytes_per_pixel() <= 4,
            _ => true,
        }
    }

    /// Decode one rectangle, writing pixels into the context canvas.
    ///
    /// Pseudo-encodings return their out-of-band event instead of touching
    /// pixel content (desktop-size resizes the canvas as its side effect).
    pub async fn decode<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        rect: &Rectangle,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<Option<PseudoEvent>> {
        match self {
            Self::Raw => raw::decode(reader, rect, ctx).await.map(|()| None),
            Self::CopyRect => copyrect::decode(reader, rect, ctx).await.map(|()| None),
            Self::Hextile => hextile::decode(reader, rect, ctx).await.map(|()| None),
            Self::Tight(codec) => codec.decode(reader, rect, ctx).await.map(|()| None),
            Self::Zrle(codec) => codec.decode(reader, rect, ctx).await.map(|()| None),
            Self::Cursor => pseudo::decode_cursor_shape(reader, rect, ctx)
                .await
                .map(Some),
            Self::CursorPosition => Ok(Some(pseudo::cursor_position(rect))),
            Self::DesktopSize => Ok(Some(pseudo::desktop_resize(rect, ctx))),
        }
    }
}

/// The session's codecs, keyed by encoding tag.
pub struct CodecRegistry {
    codecs: HashMap<i32, Codec>,
}

impl CodecRegistry {
    /// Build a registry for the negotiated encodings, in server-preferred
    /// order. Unknown tags are skipped; Raw is always registered.
    pub fn with_encodings(tags: &[i32]) -> Self {
        let mut codecs = HashMap::new();
        for &tag in tags {
            if let Some(codec) = Codec::for_encoding(tag) {
                codecs.entry(tag).or_insert(codec);
            }
        }
        codecs
            .entry(ENCODING_RAW)
            .or_insert(Codec::Raw);
        Self { codecs }
    }

    /// A registry with every encoding this engine implements.
    pub fn standard() -> Self {
        Self::with_encodings(&[
            ENCODING_TIGHT,
            ENCODING_ZRLE,
            ENCODING_HEXTILE,
            ENCODING_COPY_RECT,
            ENCODING_RAW,
            ENCODING_CURSOR,
            ENCODING_POINTER_POS,
            ENCODING_DESKTOP_SIZE,
        ])
    }

    /// Dispatch one rectangle to its codec.
    ///
    /// A rectangle naming an unregistered encoding is a protocol violation:
    /// its payload length is unknowable, so the stream cannot be resynced.
    pub async fn decode<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut WireReader<R>,
        rect: &Rectangle,
        ctx: &mut DecodeContext<'_>,
    ) -> Result<Option<PseudoEvent>> {
        let codec = self.codecs.get_mut(&rect.encoding).ok_or_else(|| {
            RfbError::protocol(format!(
                "server used unnegotiated encoding {} at ({}, {})",
                rect.encoding, rect.x, rect.y
            ))
        })?;
        tracing::trace!(
            encoding = rect.encoding,
            x = rect.x,
            y = rect.y,
            w = rect.width,
            h = rect.height,
            "decoding rectangle"
        );
        codec.decode(reader, rect, ctx).await
    }

    pub fn contains(&self, tag: i32) -> bool {
        self.codecs.contains_key(&tag)
    }
}

/// Read one pixel in the connection's generic wire form
/// (`bytes_per_pixel` bytes in the format's byte order).
pub(crate) async fn read_pixel<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    format: &PixelFormat,
    colormap: &Colormap,
) -> Result<Rgba> {
    let bpp = format.bytes_per_pixel();
    let mut raw = [0u8; 4];
    reader.read_bytes(&mut raw[..bpp]).await?;
    format.decode_pixel(&raw[..bpp], colormap)
}

/// Read one pixel in the Tight compact form: exactly three R, G, B bytes
/// when the format qualifies, the generic form otherwise.
pub(crate) async fn read_tight_pixel<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    format: &PixelFormat,
    colormap: &Colormap,
) -> Result<Rgba> {
    if format.is_compact() {
        let mut rgb = [0u8; 3];
        reader.read_bytes(&mut rgb).await?;
        Ok(Rgba::rgb(rgb[0], rgb[1], rgb[2]))
    } else {
        read_pixel(reader, format, colormap).await
    }
}

/// Parse one pixel from an in-memory slice in the Tight compact form.
pub(crate) fn parse_tight_pixel(
    raw: &[u8],
    format: &PixelFormat,
    colormap: &Colormap,
) -> Result<Rgba> {
    if format.is_compact() {
        Ok(Rgba::rgb(raw[0], raw[1], raw[2]))
    } else {
        format.decode_pixel(raw, colormap)
    }
}
