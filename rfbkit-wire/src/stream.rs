//! Buffered typed readers and writers for the RFB wire protocol.
//!
//! All multibyte integers on the wire are big-endian. The reader maintains an
//! internal buffer refilled on demand; the writer buffers everything until
//! [`WireWriter::flush`], which is what makes a message atomic on the wire.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const DEFAULT_BUFFER: usize = 8192;

/// Buffered input half of an RFB connection.
pub struct WireReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    /// Create an input stream with the default buffer size (8KB).
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_BUFFER)
    }

    /// Create an input stream with the given initial buffer capacity.
    ///
    /// A larger buffer reduces system calls on high-bandwidth connections.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Refill the buffer until it holds at least `n` bytes.
    ///
    /// EOF before that point is an `UnexpectedEof` error (a short read is
    /// never silently truncated).
    async fn ensure(&mut self, n: usize) -> std::io::Result<()> {
        while self.buffer.len() < n {
            let read = self.reader.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, got {}", n, self.buffer.len()),
                ));
            }
        }
        Ok(())
    }

    /// Read a single byte.
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached or an I/O error occurs.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rfbkit_wire::WireReader;
    /// # async fn example<R: tokio::io::AsyncRead + Unpin>(mut stream: WireReader<R>) -> std::io::Result<()> {
    /// let message_type = stream.read_u8().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        self.ensure(1).await?;
        Ok(self.buffer.get_u8())
    }

    /// Read a 16-bit unsigned integer in network byte order (big-endian).
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached or an I/O error occurs.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rfbkit_wire::WireReader;
    /// # async fn example<R: tokio::io::AsyncRead + Unpin>(mut stream: WireReader<R>) -> std::io::Result<()> {
    /// let width = stream.read_u16().await?;
    /// let height = stream.read_u16().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn read_u16(&mut self) -> std::io::Result<u16> {
        self.ensure(2).await?;
        Ok(self.buffer.get_u16())
    }

    /// Read a 32-bit unsigned integer in network byte order (big-endian).
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached or an I/O error occurs.
    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        self.ensure(4).await?;
        Ok(self.buffer.get_u32())
    }

    /// Read a 32-bit signed integer in network byte order (big-endian),
    /// the wire form of encoding tags.
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached or an I/O error occurs.
    pub async fn read_i32(&mut self) -> std::io::Result<i32> {
        self.ensure(4).await?;
        Ok(self.buffer.get_i32())
    }

    /// Read exactly `buf.len()` bytes into the provided buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached before the buffer is filled, or
    /// if an I/O error occurs.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rfbkit_wire::WireReader;
    /// # async fn example<R: tokio::io::AsyncRead + Unpin>(mut stream: WireReader<R>) -> std::io::Result<()> {
    /// let mut version = [0u8; 12];
    /// stream.read_bytes(&mut version).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.ensure(buf.len()).await?;
        self.buffer.copy_to_slice(buf);
        Ok(())
    }

    /// Read exactly `n` bytes into a fresh vector.
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached before `n` bytes arrive, or if an
    /// I/O error occurs.
    pub async fn read_vec(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_bytes(&mut buf).await?;
        Ok(buf)
    }

    /// Discard `n` bytes the protocol requires but we ignore (padding).
    ///
    /// # Errors
    ///
    /// Returns an error if EOF is reached before `n` bytes are skipped, or
    /// if an I/O error occurs.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rfbkit_wire::WireReader;
    /// # async fn example<R: tokio::io::AsyncRead + Unpin>(mut stream: WireReader<R>) -> std::io::Result<()> {
    /// // Skip 3 bytes of padding
    /// stream.skip(3).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        self.ensure(n).await?;
        self.buffer.advance(n);
        Ok(())
    }

    /// Bytes currently buffered, readable without performing I/O.
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the stream and return the underlying reader.
    ///
    /// Any buffered bytes are discarded.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Buffered output half of an RFB connection.
///
/// Writes accumulate in memory; nothing reaches the peer until
/// [`flush`](Self::flush) runs, so one buffered message is sent atomically.
pub struct WireWriter<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> WireWriter<W> {
    /// Create an output stream with the default buffer size (8KB).
    pub fn new(writer: W) -> Self {
        Self::with_capacity(writer, DEFAULT_BUFFER)
    }

    /// Create an output stream with the given initial buffer capacity.
    pub fn with_capacity(writer: W, capacity: usize) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a single byte.
    ///
    /// The byte is buffered and not sent until [`flush`](Self::flush) runs.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    /// Write a 16-bit unsigned integer in network byte order (big-endian).
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    /// Write a 32-bit unsigned integer in network byte order (big-endian).
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    /// Write a 32-bit signed integer in network byte order (big-endian),
    /// the wire form of encoding tags.
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32(value);
    }

    /// Append a byte slice to the buffer.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rfbkit_wire::WireWriter;
    /// # fn example<W: tokio::io::AsyncWrite + Unpin>(mut stream: WireWriter<W>) {
    /// stream.write_bytes(b"RFB 003.008\n");
    /// # }
    /// ```
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write `n` zero padding bytes.
    pub fn write_padding(&mut self, n: usize) {
        for _ in 0..n {
            self.buffer.put_u8(0);
        }
    }

    /// Send and flush everything buffered so far.
    ///
    /// Nothing reaches the peer until this runs; callers flush once per
    /// message so each message hits the wire whole.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails or if the underlying writer's own
    /// flush fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rfbkit_wire::WireWriter;
    /// # async fn example<W: tokio::io::AsyncWrite + Unpin>(mut stream: WireWriter<W>) -> std::io::Result<()> {
    /// stream.write_u8(2); // SetEncodings
    /// stream.write_u8(0); // padding
    /// stream.write_u16(0);
    /// stream.flush().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        self.writer.flush().await
    }

    /// Bytes currently buffered, waiting for [`flush`](Self::flush).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the stream and return the underlying writer.
    ///
    /// Any unflushed bytes are lost; call [`flush`](Self::flush) first if
    /// they matter.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_integers() {
        let data = vec![42, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut reader = WireReader::new(Cursor::new(data));
        assert_eq!(reader.read_u8().await.unwrap(), 42);
        assert_eq!(reader.read_u16().await.unwrap(), 0x1234);
        assert_eq!(reader.read_u32().await.unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_i32().await.unwrap(), -2);
    }

    #[tokio::test]
    async fn test_read_bytes_and_skip() {
        let data = vec![1, 2, 3, 4, 5];
        let mut reader = WireReader::new(Cursor::new(data));
        reader.skip(2).await.unwrap();
        let mut buf = [0u8; 2];
        reader.read_bytes(&mut buf).await.unwrap();
        assert_eq!(buf, [3, 4]);
        assert_eq!(reader.read_u8().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_short_read_is_eof() {
        let mut reader = WireReader::new(Cursor::new(vec![1u8]));
        let err = reader.read_u32().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_writer_buffers_until_flush() {
        let mut sink = Vec::new();
        let mut writer = WireWriter::new(&mut sink);
        writer.write_u8(7);
        writer.write_u16(0x0102);
        writer.write_padding(3);
        assert_eq!(writer.buffered(), 6);
        writer.flush().await.unwrap();
        assert_eq!(writer.buffered(), 0);
        assert_eq!(sink, vec![7, 1, 2, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let mut sink = Vec::new();
        {
            let mut writer = WireWriter::new(&mut sink);
            writer.write_u32(0xCAFEBABE);
            writer.write_i32(-7);
            writer.write_bytes(b"RFB ");
            writer.flush().await.unwrap();
        }
        let mut reader = WireReader::new(Cursor::new(sink));
        assert_eq!(reader.read_u32().await.unwrap(), 0xCAFEBABE);
        assert_eq!(reader.read_i32().await.unwrap(), -7);
        assert_eq!(&reader.read_vec(4).await.unwrap(), b"RFB ");
    }

    #[tokio::test]
    async fn test_available_tracks_buffer() {
        let mut reader = WireReader::new(Cursor::new(vec![1, 2, 3, 4]));
        assert_eq!(reader.available(), 0);
        reader.read_u8().await.unwrap();
        assert!(reader.available() > 0);
    }
}
