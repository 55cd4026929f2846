//! The framebuffer canvas decoders write into.
//!
//! A [`Canvas`] is a mutable RGBA8888 grid owned by the connection for the
//! lifetime of the session. It is created at server-init with the dimensions
//! the server supplies and resized only when a desktop-size pseudo-rectangle
//! arrives. Codecs write into it under a single-writer discipline.

use crate::format::Rgba;
use rfbkit_common::{Point, Rect, RfbError, Result};

const BYTES_PER_PIXEL: usize = 4;

/// A row-major RGBA8888 pixel grid.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    /// Create a canvas filled with opaque black.
    pub fn new(width: u32, height: u32) -> Self {
        let mut canvas = Self {
            width: 0,
            height: 0,
            data: Vec::new(),
        };
        canvas.width = width;
        canvas.height = height;
        canvas.data = black_data(width, height);
        canvas
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The backing RGBA bytes, row-major with no padding between rows.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    fn check_rect(&self, rect: Rect) -> Result<()> {
        if rect.x < 0
            || rect.y < 0
            || rect.x as u32 + rect.width > self.width
            || rect.y as u32 + rect.height > self.height
        {
            return Err(RfbError::protocol(format!(
                "rectangle {rect:?} outside canvas bounds {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Write one pixel. Out-of-bounds coordinates are a protocol violation.
    pub fn set(&mut self, x: u32, y: u32, color: Rgba) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(RfbError::protocol(format!(
                "pixel ({x}, {y}) outside canvas bounds {}x{}",
                self.width, self.height
            )));
        }
        let offset = self.offset(x, y);
        self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color.to_bytes());
        Ok(())
    }

    /// Read one pixel back; `None` when out of bounds.
    pub fn get(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[offset..offset + BYTES_PER_PIXEL]);
        Some(Rgba::from_bytes(bytes))
    }

    /// Write a horizontal run of pixels starting at (x, y).
    pub fn put_row(&mut self, x: u32, y: u32, pixels: &[Rgba]) -> Result<()> {
        self.check_rect(Rect::new(x as i32, y as i32, pixels.len() as u32, 1))?;
        let start = self.offset(x, y);
        for (i, color) in pixels.iter().enumerate() {
            let offset = start + i * BYTES_PER_PIXEL;
            self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color.to_bytes());
        }
        Ok(())
    }

    /// Fill a rectangle with a solid color.
    pub fn fill_rect(&mut self, rect: Rect, color: Rgba) -> Result<()> {
        self.check_rect(rect)?;
        let bytes = color.to_bytes();
        for y in 0..rect.height {
            let start = self.offset(rect.x as u32, rect.y as u32 + y);
            for x in 0..rect.width as usize {
                let offset = start + x * BYTES_PER_PIXEL;
                self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&bytes);
            }
        }
        Ok(())
    }

    /// Copy `src_rect` to `dst`, safely handling overlapping regions.
    ///
    /// Rows are copied bottom-up when the destination lies below the source
    /// so no pixel is read after it has been overwritten; within a row the
    /// copy has memmove semantics, which covers the same-row overlap case.
    pub fn blit(&mut self, src_rect: Rect, dst: Point) -> Result<()> {
        self.check_rect(src_rect)?;
        let dst_rect = Rect::new(dst.x, dst.y, src_rect.width, src_rect.height);
        self.check_rect(dst_rect)?;

        let row_bytes = src_rect.width as usize * BYTES_PER_PIXEL;
        let copy_row = |canvas: &mut Self, row: u32| {
            let src = canvas.offset(src_rect.x as u32, src_rect.y as u32 + row);
            let dst = canvas.offset(dst_rect.x as u32, dst_rect.y as u32 + row);
            canvas.data.copy_within(src..src + row_bytes, dst);
        };

        if dst.y > src_rect.y {
            for row in (0..src_rect.height).rev() {
                copy_row(self, row);
            }
        } else {
            for row in 0..src_rect.height {
                copy_row(self, row);
            }
        }
        Ok(())
    }

    /// Resize the canvas, preserving the top-left intersection of the old
    /// content and filling newly exposed area with opaque black.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        let mut data = black_data(width, height);
        let copy_rows = self.height.min(height) as usize;
        let copy_bytes = self.width.min(width) as usize * BYTES_PER_PIXEL;
        let old_stride = self.width as usize * BYTES_PER_PIXEL;
        let new_stride = width as usize * BYTES_PER_PIXEL;
        for row in 0..copy_rows {
            let src = row * old_stride;
            let dst = row * new_stride;
            data[dst..dst + copy_bytes].copy_from_slice(&self.data[src..src + copy_bytes]);
        }
        self.width = width;
        self.height = height;
        self.data = data;
    }
}

fn black_data(width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
    for pixel in data.chunks_exact_mut(BYTES_PER_PIXEL) {
        pixel[3] = 0xFF;
    }
    data
}
