//! Pixel format descriptions and conversions.
//!
//! A [`PixelFormat`] describes the bit layout of a pixel on the wire:
//! storage width, color depth, byte order, and per-channel maxima and shifts.
//! Conversion to canonical RGBA extracts each channel by shift/mask and scales
//! it into 8 bits when the channel maximum is below 255.
//!
//! The *tight* compact form: when `depth == 24` and `bits_per_pixel == 32`
//! the Tight and ZRLE encodings transmit pixels as exactly three R, G, B
//! bytes. [`PixelFormat::tight_bytes_per_pixel`] reports that width.

use rfbkit_common::{RfbError, Result};

/// Byte order of multi-byte pixels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// A canonical 8-bit-per-channel RGBA color.
///
/// Decoded pixels are always opaque; the alpha channel exists so the canvas
/// can be handed directly to RGBA consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    /// An opaque color from RGB components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }

    /// Opaque black, the canvas fill color.
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self {
            r: b[0],
            g: b[1],
            b: b[2],
            a: b[3],
        }
    }
}

/// Describes how pixels are encoded on the wire.
///
/// # Wire form
///
/// 16 bytes: bits-per-pixel, depth, big-endian flag, true-color flag, three
/// u16 channel maxima, three u8 channel shifts, and 3 padding bytes the
/// protocol requires but ignores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PixelFormat {
    /// Storage bits per pixel: 8, 16, or 32.
    pub bits_per_pixel: u8,
    /// Significant color bits, e.g. 24 for RGB888 in 32-bit storage.
    pub depth: u8,
    /// Multi-byte pixels arrive most-significant-byte first when set.
    pub big_endian: bool,
    /// Direct color when set; colormap-indexed otherwise.
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The ubiquitous little-endian 32bpp RGB888 format.
    pub fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Storage bytes per pixel, rounded up to a whole byte.
    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel.div_ceil(8) as usize
    }

    /// Bytes per pixel in the Tight/ZRLE compact form: 3 when depth is 24 in
    /// 32-bit storage, the plain storage width otherwise.
    pub fn tight_bytes_per_pixel(&self) -> usize {
        if self.depth == 24 && self.bits_per_pixel == 32 {
            3
        } else {
            self.bytes_per_pixel()
        }
    }

    /// Whether the compact 3-byte pixel form applies, including the channel
    /// range condition the Tight encoding requires.
    pub fn is_compact(&self) -> bool {
        self.true_color
            && self.depth == 24
            && self.bits_per_pixel == 32
            && self.red_max <= 255
            && self.green_max <= 255
            && self.blue_max <= 255
    }

    pub fn byte_order(&self) -> ByteOrder {
        if self.big_endian {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// Parse the 16-byte wire form.
    ///
    /// The boolean fields must be 0 or 1; the trailing padding bytes are
    /// required by the protocol but their content is ignored.
    pub fn from_wire_bytes(bytes: &[u8; 16]) -> Result<Self> {
        if bytes[2] > 1 {
            return Err(RfbError::protocol(format!(
                "pixel format big-endian flag must be 0 or 1, got {}",
                bytes[2]
            )));
        }
        if bytes[3] > 1 {
            return Err(RfbError::protocol(format!(
                "pixel format true-color flag must be 0 or 1, got {}",
                bytes[3]
            )));
        }
        Ok(Self {
            bits_per_pixel: bytes[0],
            depth: bytes[1],
            big_endian: bytes[2] != 0,
            true_color: bytes[3] != 0,
            red_max: u16::from_be_bytes([bytes[4], bytes[5]]),
            green_max: u16::from_be_bytes([bytes[6], bytes[7]]),
            blue_max: u16::from_be_bytes([bytes[8], bytes[9]]),
            red_shift: bytes[10],
            green_shift: bytes[11],
            blue_shift: bytes[12],
        })
    }

    /// Serialize to the 16-byte wire form with zero padding.
    pub fn to_wire_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0] = self.bits_per_pixel;
        bytes[1] = self.depth;
        bytes[2] = self.big_endian as u8;
        bytes[3] = self.true_color as u8;
        bytes[4..6].copy_from_slice(&self.red_max.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.green_max.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.blue_max.to_be_bytes());
        bytes[10] = self.red_shift;
        bytes[11] = self.green_shift;
        bytes[12] = self.blue_shift;
        bytes
    }

    /// Assemble raw wire bytes into a pixel integer in this format's order.
    fn assemble(&self, raw: &[u8]) -> u32 {
        let mut value = 0u32;
        match self.byte_order() {
            ByteOrder::Big => {
                for &byte in raw {
                    value = (value << 8) | byte as u32;
                }
            }
            ByteOrder::Little => {
                for (i, &byte) in raw.iter().enumerate() {
                    value |= (byte as u32) << (i * 8);
                }
            }
        }
        value
    }

    /// Convert `bytes_per_pixel` raw wire bytes to canonical RGBA.
    ///
    /// True-color formats extract channels by shift/mask and scale them to
    /// 8 bits; colormap formats use the pixel integer as a colormap index.
    /// An empty colormap is [`RfbError::UnsupportedFormat`]; an undefined
    /// index is a protocol violation.
    pub fn decode_pixel(&self, raw: &[u8], colormap: &Colormap) -> Result<Rgba> {
        debug_assert_eq!(raw.len(), self.bytes_per_pixel());
        let value = self.assemble(raw);

        if !self.true_color {
            if colormap.is_empty() {
                return Err(RfbError::UnsupportedFormat(
                    "colormap pixel format but no colormap entries defined".into(),
                ));
            }
            let index = value as u16;
            return colormap.lookup(index).ok_or_else(|| {
                RfbError::protocol(format!("colormap index {index} was never defined"))
            });
        }

        let r = (value >> self.red_shift) & self.red_max as u32;
        let g = (value >> self.green_shift) & self.green_max as u32;
        let b = (value >> self.blue_shift) & self.blue_max as u32;

        Ok(Rgba::rgb(
            scale_to_u8(r, self.red_max)?,
            scale_to_u8(g, self.green_max)?,
            scale_to_u8(b, self.blue_max)?,
        ))
    }

    /// Pack an RGBA color into this format's wire bytes.
    ///
    /// The inverse of [`decode_pixel`](Self::decode_pixel) for true-color
    /// formats; alpha is not encoded. `out` must be `bytes_per_pixel` long.
    pub fn encode_pixel(&self, color: Rgba, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.bytes_per_pixel());
        // Round-to-nearest in both scaling directions keeps
        // decode(encode(c)) exact for every representable color.
        let r = (color.r as u32 * self.red_max as u32 + 127) / 255;
        let g = (color.g as u32 * self.green_max as u32 + 127) / 255;
        let b = (color.b as u32 * self.blue_max as u32 + 127) / 255;
        let mut value =
            (r << self.red_shift) | (g << self.green_shift) | (b << self.blue_shift);

        match self.byte_order() {
            ByteOrder::Big => {
                for slot in out.iter_mut().rev() {
                    *slot = (value & 0xFF) as u8;
                    value >>= 8;
                }
            }
            ByteOrder::Little => {
                for slot in out.iter_mut() {
                    *slot = (value & 0xFF) as u8;
                    value >>= 8;
                }
            }
        }
    }
}

fn scale_to_u8(component: u32, max: u16) -> Result<u8> {
    if max == 0 {
        return Err(RfbError::protocol("pixel format channel max is zero"));
    }
    if max == 255 {
        return Ok(component as u8);
    }
    Ok(((component * 255 + (max as u32 >> 1)) / max as u32) as u8)
}

/// A colormap populated by SetColorMapEntries.
///
/// Maps 16-bit indices to 16-bit-per-channel RGB entries. Decoded pixels may
/// only use indices the server has previously defined.
#[derive(Debug, Clone, Default)]
pub struct Colormap {
    entries: Vec<Option<(u16, u16, u16)>>,
}

impl Colormap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Install `colors` starting at `first`, overwriting existing entries.
    pub fn set_entries(&mut self, first: u16, colors: &[(u16, u16, u16)]) {
        let end = first as usize + colors.len();
        if self.entries.len() < end {
            self.entries.resize(end, None);
        }
        for (i, &color) in colors.iter().enumerate() {
            self.entries[first as usize + i] = Some(color);
        }
    }

    /// Look up an index, converting the 16-bit channels down to RGBA.
    pub fn lookup(&self, index: u16) -> Option<Rgba> {
        let (r, g, b) = (*self.entries.get(index as usize)?)?;
        Some(Rgba::rgb((r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8))
    }

    pub fn defined_len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::rgb888().bytes_per_pixel(), 4);
        let mut pf = PixelFormat::rgb888();
        pf.bits_per_pixel = 16;
        assert_eq!(pf.bytes_per_pixel(), 2);
        pf.bits_per_pixel = 8;
        assert_eq!(pf.bytes_per_pixel(), 1);
    }

    #[test]
    fn test_tight_bytes_per_pixel() {
        assert_eq!(PixelFormat::rgb888().tight_bytes_per_pixel(), 3);

        let mut pf = PixelFormat::rgb888();
        pf.depth = 32;
        assert_eq!(pf.tight_bytes_per_pixel(), 4);

        let rgb565 = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_color: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        assert_eq!(rgb565.tight_bytes_per_pixel(), 2);
        assert!(!rgb565.is_compact());
        assert!(PixelFormat::rgb888().is_compact());
    }

    #[test]
    fn test_wire_round_trip() {
        let pf = PixelFormat::rgb888();
        let bytes = pf.to_wire_bytes();
        assert_eq!(PixelFormat::from_wire_bytes(&bytes).unwrap(), pf);
    }

    #[test]
    fn test_wire_rejects_bad_booleans() {
        let mut bytes = PixelFormat::rgb888().to_wire_bytes();
        bytes[2] = 2;
        assert!(PixelFormat::from_wire_bytes(&bytes).is_err());

        let mut bytes = PixelFormat::rgb888().to_wire_bytes();
        bytes[3] = 9;
        assert!(PixelFormat::from_wire_bytes(&bytes).is_err());
    }

    #[test]
    fn test_wire_padding_ignored() {
        let mut bytes = PixelFormat::rgb888().to_wire_bytes();
        bytes[13] = 0xAA;
        bytes[15] = 0x01;
        assert!(PixelFormat::from_wire_bytes(&bytes).is_ok());
    }

    #[test]
    fn test_decode_little_endian_rgb888() {
        let pf = PixelFormat::rgb888();
        let cm = Colormap::new();
        // 0x00112233 little-endian
        let rgba = pf.decode_pixel(&[0x33, 0x22, 0x11, 0x00], &cm).unwrap();
        assert_eq!(rgba, Rgba::rgb(0x11, 0x22, 0x33));
        assert_eq!(rgba.a, 0xFF);
    }

    #[test]
    fn test_decode_big_endian() {
        let mut pf = PixelFormat::rgb888();
        pf.big_endian = true;
        let cm = Colormap::new();
        let rgba = pf.decode_pixel(&[0x00, 0x11, 0x22, 0x33], &cm).unwrap();
        assert_eq!(rgba, Rgba::rgb(0x11, 0x22, 0x33));
    }

    #[test]
    fn test_rgb565_scaling() {
        let pf = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_color: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        let cm = Colormap::new();
        // White in RGB565: 0xFFFF little-endian
        let rgba = pf.decode_pixel(&[0xFF, 0xFF], &cm).unwrap();
        assert_eq!(rgba, Rgba::rgb(255, 255, 255));
    }

    #[test]
    fn test_colormap_lookup() {
        let mut pf = PixelFormat::rgb888();
        pf.bits_per_pixel = 8;
        pf.true_color = false;

        let mut cm = Colormap::new();

        // Empty colormap is unsupported
        let err = pf.decode_pixel(&[0], &cm).unwrap_err();
        assert!(matches!(err, RfbError::UnsupportedFormat(_)));

        cm.set_entries(0, &[(0xFFFF, 0, 0), (0, 0xFFFF, 0)]);
        assert_eq!(pf.decode_pixel(&[0], &cm).unwrap(), Rgba::rgb(255, 0, 0));
        assert_eq!(pf.decode_pixel(&[1], &cm).unwrap(), Rgba::rgb(0, 255, 0));

        // Undefined index is a protocol violation
        let err = pf.decode_pixel(&[5], &cm).unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[test]
    fn test_colormap_sparse_definition() {
        let mut cm = Colormap::new();
        cm.set_entries(10, &[(1 << 8, 2 << 8, 3 << 8)]);
        assert_eq!(cm.lookup(10), Some(Rgba::rgb(1, 2, 3)));
        assert_eq!(cm.lookup(9), None);
        assert_eq!(cm.defined_len(), 1);
    }

    fn arbitrary_true_color_format() -> impl Strategy<Value = PixelFormat> {
        (
            prop::sample::select(vec![
                // (bpp, depth, rmax, gmax, bmax, rsh, gsh, bsh)
                (32u8, 24u8, 255u16, 255u16, 255u16, 16u8, 8u8, 0u8),
                (32, 24, 255, 255, 255, 0, 8, 16),
                (16, 16, 31, 63, 31, 11, 5, 0),
                (8, 8, 7, 7, 3, 0, 3, 6),
            ]),
            prop::bool::ANY,
        )
            .prop_map(|((bpp, depth, rm, gm, bm, rs, gs, bs), big_endian)| PixelFormat {
                bits_per_pixel: bpp,
                depth,
                big_endian,
                true_color: true,
                red_max: rm,
                green_max: gm,
                blue_max: bm,
                red_shift: rs,
                green_shift: gs,
                blue_shift: bs,
            })
    }

    proptest! {
        /// Every color representable in a format survives encode -> decode.
        #[test]
        fn pixel_round_trip(pf in arbitrary_true_color_format(), r in 0u32..=255, g in 0u32..=255, b in 0u32..=255) {
            // Quantize to the format's channel resolution first so the value
            // is actually representable.
            let q = |c: u32, max: u16| {
                let down = (c * max as u32 + 127) / 255;
                (down * 255 + (max as u32 >> 1)) / max as u32
            };
            let color = Rgba::rgb(
                q(r, pf.red_max) as u8,
                q(g, pf.green_max) as u8,
                q(b, pf.blue_max) as u8,
            );

            let mut raw = vec![0u8; pf.bytes_per_pixel()];
            pf.encode_pixel(color, &mut raw);
            let decoded = pf.decode_pixel(&raw, &Colormap::new()).unwrap();
            prop_assert_eq!(decoded, color);
        }
    }
}
