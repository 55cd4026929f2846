//! Server-to-client RFB messages.
//!
//! `FramebufferUpdate` is special: only its header (padding + rectangle
//! count) is parsed here. Each rectangle header is followed on the wire by an
//! encoding-specific payload that only the codec layer can size, so the
//! session reads `rect_count` times { [`Rectangle`] header, codec payload }
//! after receiving [`ServerMessage::FramebufferUpdate`].

use crate::messages::types::{read_pixel_format, write_pixel_format};
use crate::stream::{WireReader, WireWriter};
use bytes::Bytes;
use rfbkit_common::{RfbError, Result};
use rfbkit_pixels::PixelFormat;
use tokio::io::{AsyncRead, AsyncWrite};

/// Message type tags for the server-to-client direction.
pub const MSG_FRAMEBUFFER_UPDATE: u8 = 0;
pub const MSG_SET_COLOR_MAP_ENTRIES: u8 = 1;
pub const MSG_BELL: u8 = 2;
pub const MSG_SERVER_CUT_TEXT: u8 = 3;

/// ServerInit: framebuffer dimensions, pixel format, and desktop name.
///
/// The desktop name is kept as raw bytes; the protocol does not promise any
/// particular text encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    pub name: Vec<u8>,
}

impl ServerInit {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        let width = reader.read_u16().await?;
        let height = reader.read_u16().await?;
        let format = read_pixel_format(reader).await?;
        let name_length = reader.read_u32().await? as usize;
        let name = reader.read_vec(name_length).await?;
        Ok(Self {
            width,
            height,
            format,
            name,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u16(self.width);
        writer.write_u16(self.height);
        write_pixel_format(writer, &self.format);
        writer.write_u32(self.name.len() as u32);
        writer.write_bytes(&self.name);
    }

    /// The desktop name as lossy UTF-8, for display and logging.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// SetColorMapEntries: install colormap entries starting at `first_color`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetColorMapEntries {
    pub first_color: u16,
    pub colors: Vec<(u16, u16, u16)>,
}

impl SetColorMapEntries {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        reader.skip(1).await?;
        let first_color = reader.read_u16().await?;
        let count = reader.read_u16().await? as usize;
        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            colors.push((
                reader.read_u16().await?,
                reader.read_u16().await?,
                reader.read_u16().await?,
            ));
        }
        Ok(Self {
            first_color,
            colors,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_SET_COLOR_MAP_ENTRIES);
        writer.write_padding(1);
        writer.write_u16(self.first_color);
        writer.write_u16(self.colors.len() as u16);
        for &(r, g, b) in &self.colors {
            writer.write_u16(r);
            writer.write_u16(g);
            writer.write_u16(b);
        }
    }
}

/// Bell: audible notification, no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bell;

impl Bell {
    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_BELL);
    }
}

/// ServerCutText: clipboard bytes from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCutText {
    pub text: Bytes,
}

impl ServerCutText {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        reader.skip(3).await?;
        let length = reader.read_u32().await? as usize;
        let text = Bytes::from(reader.read_vec(length).await?);
        Ok(Self { text })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_SERVER_CUT_TEXT);
        writer.write_padding(3);
        writer.write_u32(self.text.len() as u32);
        writer.write_bytes(&self.text);
    }
}

/// Any server-to-client message, as dispatched by the reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A framebuffer update follows: `rect_count` rectangles, each a header
    /// plus an encoding-specific payload the codec layer consumes.
    FramebufferUpdate { rect_count: u16 },
    SetColorMapEntries(SetColorMapEntries),
    Bell,
    ServerCutText(ServerCutText),
}

impl ServerMessage {
    /// Read the next message header, dispatching on the leading type byte.
    ///
    /// Unknown tags are fatal and terminate the session.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        let tag = reader.read_u8().await?;
        match tag {
            MSG_FRAMEBUFFER_UPDATE => {
                reader.skip(1).await?;
                let rect_count = reader.read_u16().await?;
                Ok(Self::FramebufferUpdate { rect_count })
            }
            MSG_SET_COLOR_MAP_ENTRIES => Ok(Self::SetColorMapEntries(
                SetColorMapEntries::read_from(reader).await?,
            )),
            MSG_BELL => Ok(Self::Bell),
            MSG_SERVER_CUT_TEXT => Ok(Self::ServerCutText(ServerCutText::read_from(reader).await?)),
            other => Err(RfbError::protocol(format!(
                "unknown server message type {other}"
            ))),
        }
    }
}

/// Write the FramebufferUpdate header (server role); rectangle headers and
/// payloads follow separately.
pub fn write_update_header<W: AsyncWrite + Unpin>(writer: &mut WireWriter<W>, rect_count: u16) {
    writer.write_u8(MSG_FRAMEBUFFER_UPDATE);
    writer.write_padding(1);
    writer.write_u16(rect_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_server_init_round_trip() {
        let original = ServerInit {
            width: 1920,
            height: 1080,
            format: PixelFormat::rgb888(),
            name: b"Test Desktop".to_vec(),
        };

        let mut buffer = Vec::new();
        let mut writer = WireWriter::new(&mut buffer);
        original.write_to(&mut writer);
        writer.flush().await.unwrap();

        let mut reader = WireReader::new(Cursor::new(buffer));
        let read_back = ServerInit::read_from(&mut reader).await.unwrap();
        assert_eq!(original, read_back);
        assert_eq!(read_back.name_lossy(), "Test Desktop");
    }

    #[tokio::test]
    async fn test_update_header() {
        let mut buffer = Vec::new();
        let mut writer = WireWriter::new(&mut buffer);
        write_update_header(&mut writer, 3);
        writer.flush().await.unwrap();
        assert_eq!(buffer, vec![0, 0, 0, 3]);

        let mut reader = WireReader::new(Cursor::new(buffer));
        let msg = ServerMessage::read_from(&mut reader).await.unwrap();
        assert_eq!(msg, ServerMessage::FramebufferUpdate { rect_count: 3 });
    }

    #[tokio::test]
    async fn test_colormap_entries_round_trip() {
        let original = SetColorMapEntries {
            first_color: 10,
            colors: vec![(65535, 0, 0), (0, 65535, 0)],
        };

        let mut buffer = Vec::new();
        let mut writer = WireWriter::new(&mut buffer);
        original.write_to(&mut writer);
        writer.flush().await.unwrap();

        let mut reader = WireReader::new(Cursor::new(buffer));
        match ServerMessage::read_from(&mut reader).await.unwrap() {
            ServerMessage::SetColorMapEntries(msg) => assert_eq!(msg, original),
            other => panic!("expected SetColorMapEntries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bell_has_no_body() {
        let mut buffer = Vec::new();
        let mut writer = WireWriter::new(&mut buffer);
        Bell.write_to(&mut writer);
        writer.flush().await.unwrap();
        assert_eq!(buffer, vec![MSG_BELL]);

        let mut reader = WireReader::new(Cursor::new(buffer));
        assert_eq!(
            ServerMessage::read_from(&mut reader).await.unwrap(),
            ServerMessage::Bell
        );
    }

    #[tokio::test]
    async fn test_cut_text_round_trip() {
        let original = ServerCutText {
            text: Bytes::from_static(b"clipboard contents"),
        };

        let mut buffer = Vec::new();
        let mut writer = WireWriter::new(&mut buffer);
        original.write_to(&mut writer);
        writer.flush().await.unwrap();

        let mut reader = WireReader::new(Cursor::new(buffer));
        match ServerMessage::read_from(&mut reader).await.unwrap() {
            ServerMessage::ServerCutText(msg) => assert_eq!(msg, original),
            other => panic!("expected ServerCutText, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tag_is_fatal() {
        let mut reader = WireReader::new(Cursor::new(vec![200u8]));
        let err = ServerMessage::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }
}
