//! Shared wire types: the rectangle header and pixel-format serialization.

use crate::stream::{WireReader, WireWriter};
use rfbkit_common::Result;
use rfbkit_pixels::PixelFormat;
use tokio::io::{AsyncRead, AsyncWrite};

/// Rectangle header of a framebuffer update.
///
/// 12 bytes on the wire: x, y, width, height as u16 and the signed encoding
/// tag. Positive tags denote true encodings; negative tags denote
/// pseudo-encodings whose payload carries metadata instead of pixels. The
/// encoding-specific payload follows the header and is consumed by the codec
/// layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl Rectangle {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        Ok(Self {
            x: reader.read_u16().await?,
            y: reader.read_u16().await?,
            width: reader.read_u16().await?,
            height: reader.read_u16().await?,
            encoding: reader.read_i32().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u16(self.x);
        writer.write_u16(self.y);
        writer.write_u16(self.width);
        writer.write_u16(self.height);
        writer.write_i32(self.encoding);
    }

    pub fn is_pseudo(&self) -> bool {
        self.encoding < 0
    }
}

/// Read the 16-byte pixel format block.
pub async fn read_pixel_format<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
) -> Result<PixelFormat> {
    let mut bytes = [0u8; 16];
    reader.read_bytes(&mut bytes).await?;
    PixelFormat::from_wire_bytes(&bytes)
}

/// Write the 16-byte pixel format block.
pub fn write_pixel_format<W: AsyncWrite + Unpin>(writer: &mut WireWriter<W>, format: &PixelFormat) {
    writer.write_bytes(&format.to_wire_bytes());
}
