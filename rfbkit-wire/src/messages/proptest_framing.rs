//! Property tests for message framing under fragmentation.
//!
//! Real TCP streams hand the parser arbitrary fragments; these tests verify
//! that parsing is byte-boundary agnostic by splitting the input at every
//! possible position.

use super::server::ServerInit;
use super::types::Rectangle;
use crate::stream::WireReader;
use proptest::prelude::*;
use rfbkit_pixels::PixelFormat;

/// A reader that refuses to cross `boundary` in a single read, forcing the
/// buffered stream to reassemble the message from two fragments.
struct FragmentingReader {
    data: Vec<u8>,
    pos: usize,
    boundary: usize,
}

impl FragmentingReader {
    fn new(data: Vec<u8>, boundary: usize) -> Self {
        let boundary = boundary.min(data.len());
        Self {
            data,
            pos: 0,
            boundary,
        }
    }
}

impl tokio::io::AsyncRead for FragmentingReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.pos >= self.data.len() {
            return std::task::Poll::Ready(Ok(()));
        }
        let limit = if self.pos < self.boundary {
            self.boundary
        } else {
            self.data.len()
        };
        let available = (limit - self.pos).min(buf.remaining());
        if available > 0 {
            let start = self.pos;
            buf.put_slice(&self.data[start..start + available]);
            self.pos += available;
        }
        std::task::Poll::Ready(Ok(()))
    }
}

fn arbitrary_pixel_format() -> impl Strategy<Value = PixelFormat> {
    (
        prop::sample::select(vec![(8u8, 8u8), (16, 16), (32, 24)]),
        prop::bool::ANY,
        prop::sample::select(vec![15u16, 31, 63, 255]),
    )
        .prop_map(|((bpp, depth), big_endian, max)| PixelFormat {
            bits_per_pixel: bpp,
            depth,
            big_endian,
            true_color: true,
            red_max: max,
            green_max: max,
            blue_max: max,
            red_shift: 0,
            green_shift: bpp / 3,
            blue_shift: 2 * (bpp / 3),
        })
}

fn arbitrary_server_init() -> impl Strategy<Value = ServerInit> {
    (
        1u16..=7680,
        1u16..=4320,
        arbitrary_pixel_format(),
        proptest::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(width, height, format, name)| ServerInit {
            width,
            height,
            format,
            name,
        })
}

fn arbitrary_rectangle() -> impl Strategy<Value = Rectangle> {
    (
        0u16..=1920,
        0u16..=1080,
        1u16..=640,
        1u16..=480,
        prop::sample::select(vec![0i32, 1, 5, 7, 16, -223, -239]),
    )
        .prop_map(|(x, y, width, height, encoding)| Rectangle {
            x,
            y,
            width,
            height,
            encoding,
        })
}

async fn encode_server_init(msg: &ServerInit) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut writer = crate::stream::WireWriter::new(&mut buffer);
    msg.write_to(&mut writer);
    writer.flush().await.unwrap();
    buffer
}

proptest! {
    /// ServerInit parses identically no matter where the stream fragments.
    #[test]
    fn server_init_survives_fragmentation(msg in arbitrary_server_init(), split in 0usize..64) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let bytes = encode_server_init(&msg).await;
            let boundary = split % bytes.len().max(1);
            let mut reader = WireReader::new(FragmentingReader::new(bytes, boundary));
            let parsed = ServerInit::read_from(&mut reader).await.unwrap();
            prop_assert_eq!(parsed, msg);
            Ok(())
        })?;
    }

    /// Rectangle headers parse identically no matter where the stream
    /// fragments.
    #[test]
    fn rectangle_survives_fragmentation(rect in arbitrary_rectangle(), boundary in 0usize..12) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut buffer = Vec::new();
            let mut writer = crate::stream::WireWriter::new(&mut buffer);
            rect.write_to(&mut writer);
            writer.flush().await.unwrap();

            let mut reader = WireReader::new(FragmentingReader::new(buffer, boundary));
            let parsed = Rectangle::read_from(&mut reader).await.unwrap();
            prop_assert_eq!(parsed, rect);
            Ok(())
        })?;
    }
}
