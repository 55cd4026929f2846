//! Client-to-server RFB messages.

use crate::messages::types::{read_pixel_format, write_pixel_format};
use crate::stream::{WireReader, WireWriter};
use bytes::Bytes;
use rfbkit_common::{RfbError, Result};
use rfbkit_pixels::PixelFormat;
use tokio::io::{AsyncRead, AsyncWrite};

/// Message type tags for the client-to-server direction.
pub const MSG_SET_PIXEL_FORMAT: u8 = 0;
pub const MSG_SET_ENCODINGS: u8 = 2;
pub const MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
pub const MSG_KEY_EVENT: u8 = 4;
pub const MSG_POINTER_EVENT: u8 = 5;
pub const MSG_CLIENT_CUT_TEXT: u8 = 6;

/// ClientInit: one byte, the shared-session flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInit {
    pub shared: bool,
}

impl ClientInit {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        let flag = reader.read_u8().await?;
        if flag > 1 {
            return Err(RfbError::protocol(format!(
                "shared flag must be 0 or 1, got {flag}"
            )));
        }
        Ok(Self { shared: flag == 1 })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(self.shared as u8);
    }
}

/// SetPixelFormat: ask the server to use a different pixel format.
///
/// Wire: type byte, 3 padding bytes, 16-byte pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPixelFormat {
    pub format: PixelFormat,
}

impl SetPixelFormat {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        reader.skip(3).await?;
        Ok(Self {
            format: read_pixel_format(reader).await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_SET_PIXEL_FORMAT);
        writer.write_padding(3);
        write_pixel_format(writer, &self.format);
    }
}

/// SetEncodings: the ordered list of encoding tags the client understands.
///
/// Wire: type byte, 1 padding byte, u16 count, count i32 tags. The server
/// chooses among them per rectangle; order expresses preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEncodings {
    pub encodings: Vec<i32>,
}

impl SetEncodings {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        reader.skip(1).await?;
        let count = reader.read_u16().await? as usize;
        let mut encodings = Vec::with_capacity(count);
        for _ in 0..count {
            encodings.push(reader.read_i32().await?);
        }
        Ok(Self { encodings })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_SET_ENCODINGS);
        writer.write_padding(1);
        writer.write_u16(self.encodings.len() as u16);
        for &encoding in &self.encodings {
            writer.write_i32(encoding);
        }
    }
}

/// FramebufferUpdateRequest: ask for (incremental) updates of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateRequest {
    pub incremental: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl FramebufferUpdateRequest {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        let flag = reader.read_u8().await?;
        if flag > 1 {
            return Err(RfbError::protocol(format!(
                "incremental flag must be 0 or 1, got {flag}"
            )));
        }
        Ok(Self {
            incremental: flag == 1,
            x: reader.read_u16().await?,
            y: reader.read_u16().await?,
            width: reader.read_u16().await?,
            height: reader.read_u16().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_FRAMEBUFFER_UPDATE_REQUEST);
        writer.write_u8(self.incremental as u8);
        writer.write_u16(self.x);
        writer.write_u16(self.y);
        writer.write_u16(self.width);
        writer.write_u16(self.height);
    }
}

/// KeyEvent: a key press or release, identified by X11 keysym.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub down: bool,
    pub keysym: u32,
}

impl KeyEvent {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        let flag = reader.read_u8().await?;
        if flag > 1 {
            return Err(RfbError::protocol(format!(
                "key down flag must be 0 or 1, got {flag}"
            )));
        }
        reader.skip(2).await?;
        Ok(Self {
            down: flag == 1,
            keysym: reader.read_u32().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_KEY_EVENT);
        writer.write_u8(self.down as u8);
        writer.write_padding(2);
        writer.write_u32(self.keysym);
    }
}

/// PointerEvent: pointer position plus a button bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub buttons: u8,
    pub x: u16,
    pub y: u16,
}

impl PointerEvent {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        Ok(Self {
            buttons: reader.read_u8().await?,
            x: reader.read_u16().await?,
            y: reader.read_u16().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_POINTER_EVENT);
        writer.write_u8(self.buttons);
        writer.write_u16(self.x);
        writer.write_u16(self.y);
    }
}

/// ClientCutText: clipboard bytes from the client (Latin-1 per the protocol,
/// carried opaquely here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCutText {
    pub text: Bytes,
}

impl ClientCutText {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        reader.skip(3).await?;
        let length = reader.read_u32().await? as usize;
        let text = Bytes::from(reader.read_vec(length).await?);
        Ok(Self { text })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        writer.write_u8(MSG_CLIENT_CUT_TEXT);
        writer.write_padding(3);
        writer.write_u32(self.text.len() as u32);
        writer.write_bytes(&self.text);
    }
}

/// Any client-to-server message, as dispatched by the server role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(SetPixelFormat),
    SetEncodings(SetEncodings),
    FramebufferUpdateRequest(FramebufferUpdateRequest),
    KeyEvent(KeyEvent),
    PointerEvent(PointerEvent),
    ClientCutText(ClientCutText),
}

impl ClientMessage {
    /// Read one message, dispatching on the leading type byte.
    ///
    /// Unknown tags are fatal.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<Self> {
        let tag = reader.read_u8().await?;
        match tag {
            MSG_SET_PIXEL_FORMAT => Ok(Self::SetPixelFormat(
                SetPixelFormat::read_from(reader).await?,
            )),
            MSG_SET_ENCODINGS => Ok(Self::SetEncodings(SetEncodings::read_from(reader).await?)),
            MSG_FRAMEBUFFER_UPDATE_REQUEST => Ok(Self::FramebufferUpdateRequest(
                FramebufferUpdateRequest::read_from(reader).await?,
            )),
            MSG_KEY_EVENT => Ok(Self::KeyEvent(KeyEvent::read_from(reader).await?)),
            MSG_POINTER_EVENT => Ok(Self::PointerEvent(PointerEvent::read_from(reader).await?)),
            MSG_CLIENT_CUT_TEXT => Ok(Self::ClientCutText(ClientCutText::read_from(reader).await?)),
            other => Err(RfbError::protocol(format!(
                "unknown client message type {other}"
            ))),
        }
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut WireWriter<W>) {
        match self {
            Self::SetPixelFormat(msg) => msg.write_to(writer),
            Self::SetEncodings(msg) => msg.write_to(writer),
            Self::FramebufferUpdateRequest(msg) => msg.write_to(writer),
            Self::KeyEvent(msg) => msg.write_to(writer),
            Self::PointerEvent(msg) => msg.write_to(writer),
            Self::ClientCutText(msg) => msg.write_to(writer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn round_trip(msg: ClientMessage) -> ClientMessage {
        let mut buffer = Vec::new();
        let mut writer = WireWriter::new(&mut buffer);
        msg.write_to(&mut writer);
        writer.flush().await.unwrap();

        let mut reader = WireReader::new(Cursor::new(buffer));
        ClientMessage::read_from(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_pixel_format_round_trip() {
        let msg = ClientMessage::SetPixelFormat(SetPixelFormat {
            format: PixelFormat::rgb888(),
        });
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_set_encodings_round_trip() {
        let msg = ClientMessage::SetEncodings(SetEncodings {
            encodings: vec![7, 16, 5, 1, 0, -239, -223],
        });
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_update_request_round_trip() {
        let msg = ClientMessage::FramebufferUpdateRequest(FramebufferUpdateRequest {
            incremental: true,
            x: 10,
            y: 20,
            width: 640,
            height: 480,
        });
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_key_and_pointer_round_trip() {
        let key = ClientMessage::KeyEvent(KeyEvent {
            down: true,
            keysym: 0xFF0D,
        });
        assert_eq!(round_trip(key.clone()).await, key);

        let pointer = ClientMessage::PointerEvent(PointerEvent {
            buttons: 0b101,
            x: 300,
            y: 400,
        });
        assert_eq!(round_trip(pointer.clone()).await, pointer);
    }

    #[tokio::test]
    async fn test_cut_text_round_trip() {
        let msg = ClientMessage::ClientCutText(ClientCutText {
            text: Bytes::from_static(b"copied"),
        });
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_fatal() {
        let mut reader = WireReader::new(Cursor::new(vec![99u8, 0, 0]));
        let err = ClientMessage::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_client_init_flag_validation() {
        let mut reader = WireReader::new(Cursor::new(vec![2u8]));
        assert!(ClientInit::read_from(&mut reader).await.is_err());

        let mut reader = WireReader::new(Cursor::new(vec![1u8]));
        let init = ClientInit::read_from(&mut reader).await.unwrap();
        assert!(init.shared);
    }
}
