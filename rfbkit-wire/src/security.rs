//! Security types and the VNC authentication subprotocol.
//!
//! Two security types are built in: `None` and classic VNC password
//! authentication. VNC auth is a DES challenge-response with a quirk: the
//! password is truncated or zero-padded to 8 bytes and every key byte has its
//! bits reversed before being fed to DES.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;

/// The security types this engine can negotiate.
///
/// Other types are representable on the wire but negotiating one fails with
/// `SecurityRejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SecurityKind {
    /// Type 1: no authentication.
    None,
    /// Type 2: VNC password authentication.
    VncAuth,
}

impl SecurityKind {
    /// The wire value of this security type.
    pub fn type_id(self) -> u8 {
        match self {
            Self::None => 1,
            Self::VncAuth => 2,
        }
    }

    /// Map a wire value back to a supported kind.
    pub fn from_type_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::None),
            2 => Some(Self::VncAuth),
            _ => None,
        }
    }
}

/// Compute the VNC auth response for a 16-byte server challenge.
///
/// The challenge is encrypted as two independent DES blocks under the
/// bit-reversed, 8-byte-normalized password key.
pub fn encrypt_challenge(challenge: &[u8; 16], password: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (slot, &byte) in key.iter_mut().zip(password.iter().take(8)) {
        *slot = byte.reverse_bits();
    }

    let cipher = Des::new_from_slice(&key).expect("DES key is always 8 bytes");

    let mut response = *challenge;
    let (first, second) = response.split_at_mut(8);
    cipher.encrypt_block(<&mut [u8; 8]>::try_from(first).unwrap().into());
    cipher.encrypt_block(<&mut [u8; 8]>::try_from(second).unwrap().into());
    response
}
