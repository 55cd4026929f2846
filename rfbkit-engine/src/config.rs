//! Session configuration.

use rfbkit_codecs::{
    ENCODING_COPY_RECT, ENCODING_CURSOR, ENCODING_DESKTOP_SIZE, ENCODING_HEXTILE,
    ENCODING_POINTER_POS, ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE,
};
use rfbkit_pixels::PixelFormat;
use rfbkit_wire::SecurityKind;
use serde::{Deserialize, Serialize};

/// Configuration for one RFB session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pixel format to advertise via SetPixelFormat after init. `None`
    /// keeps whatever the server announced in ServerInit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_format: Option<PixelFormat>,

    /// Encoding tags to advertise, in preference order. The server chooses
    /// among them per rectangle.
    #[serde(default = "default_encodings")]
    pub encodings: Vec<i32>,

    /// Security handlers in preference order; the first one the server
    /// offers is used.
    #[serde(default = "default_security")]
    pub security: Vec<SecurityKind>,

    /// Password bytes for VNC authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Vec<u8>>,

    /// Request a shared session at ClientInit.
    #[serde(default = "default_shared")]
    pub shared: bool,
}

fn default_encodings() -> Vec<i32> {
    vec![
        ENCODING_TIGHT,
        ENCODING_ZRLE,
        ENCODING_HEXTILE,
        ENCODING_COPY_RECT,
        ENCODING_RAW,
        ENCODING_CURSOR,
        ENCODING_POINTER_POS,
        ENCODING_DESKTOP_SIZE,
    ]
}

fn default_security() -> Vec<SecurityKind> {
    vec![SecurityKind::None, SecurityKind::VncAuth]
}

fn default_shared() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preferred_format: None,
            encodings: default_encodings(),
            security: default_security(),
            password: None,
            shared: default_shared(),
        }
    }
}
