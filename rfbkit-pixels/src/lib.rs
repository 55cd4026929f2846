//! Pixel format model and framebuffer canvas.
//!
//! The RFB protocol supports two color models:
//! - **True color**: each pixel directly encodes RGB values using bit fields
//!   described by a [`PixelFormat`]
//! - **Colormap**: pixels are indices into a server-populated [`Colormap`]
//!
//! Decoders convert wire pixels through these types into canonical
//! [`Rgba`] values and write them into a [`Canvas`], the client-side
//! framebuffer image accumulating updates.

pub mod canvas;
pub mod format;

pub use canvas::Canvas;
pub use format::{ByteOrder, Colormap, PixelFormat, Rgba};
