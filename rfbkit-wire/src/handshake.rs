//! The RFB handshake state machine.
//!
//! The handshake runs through version negotiation, security negotiation, the
//! type-specific security subprotocol, the security result, ClientInit, and
//! ServerInit, after which the connection is in the running state and the
//! message multiplexer takes over.
//!
//! The client role drives a full handshake via [`negotiate_version`],
//! [`negotiate_security`], and the init message types. The [`server`] module
//! provides the server role's wire halves so a server (or a test harness) can
//! run the opposite side of the same state machine.
//!
//! Version rules: both ends advertise a version; the effective version is the
//! minimum, pinned to one of 3.3, 3.7, or 3.8. A server advertising 3.9 or
//! above negotiates to 3.8; 3.4-3.6 collapse to 3.3; anything below 3.3 is a
//! protocol violation. Version 3.3 has a fixed server-chosen security type
//! (scalar u32 on the wire); 3.7+ uses the length-prefixed type list.

use crate::security::{encrypt_challenge, SecurityKind};
use crate::stream::{WireReader, WireWriter};
use rfbkit_common::{RfbError, Result};
use tokio::io::{AsyncRead, AsyncWrite};

/// A negotiated RFB protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// The 12-byte ASCII version line for this version.
    pub fn wire_bytes(self) -> &'static [u8; 12] {
        match self {
            Self::V3_3 => b"RFB 003.003\n",
            Self::V3_7 => b"RFB 003.007\n",
            Self::V3_8 => b"RFB 003.008\n",
        }
    }

    /// Human-readable form, e.g. `"3.8"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V3_3 => "3.3",
            Self::V3_7 => "3.7",
            Self::V3_8 => "3.8",
        }
    }

    /// Pin an advertised major.minor to the closest version we speak.
    fn from_advertised(major: u32, minor: u32) -> Result<Self> {
        if major < 3 || (major == 3 && minor < 3) {
            return Err(RfbError::protocol(format!(
                "unsupported RFB version {major}.{minor} (below 3.3)"
            )));
        }
        Ok(if major > 3 || minor >= 8 {
            Self::V3_8
        } else if minor == 7 {
            Self::V3_7
        } else {
            Self::V3_3
        })
    }
}

/// Parse a 12-byte `RFB xxx.yyy\n` version line.
fn parse_version_line(line: &[u8; 12]) -> Result<(u32, u32)> {
    if &line[0..4] != b"RFB " || line[7] != b'.' || line[11] != b'\n' {
        return Err(RfbError::protocol(format!(
            "malformed RFB version line: {:?}",
            String::from_utf8_lossy(line)
        )));
    }
    let parse = |digits: &[u8]| -> Result<u32> {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                RfbError::protocol(format!(
                    "non-numeric RFB version digits: {:?}",
                    String::from_utf8_lossy(digits)
                ))
            })
    };
    Ok((parse(&line[4..7])?, parse(&line[8..11])?))
}

/// Client role: read the server's version line and reply with our choice.
///
/// The negotiated version is min(server, 3.8) pinned to {3.3, 3.7, 3.8}.
pub async fn negotiate_version<R, W>(
    reader: &mut WireReader<R>,
    writer: &mut WireWriter<W>,
) -> Result<ProtocolVersion>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = [0u8; 12];
    reader.read_bytes(&mut line).await?;
    let (major, minor) = parse_version_line(&line)?;
    let version = ProtocolVersion::from_advertised(major, minor)?;
    tracing::debug!(server = %String::from_utf8_lossy(&line).trim(), negotiated = version.as_str(), "version negotiated");

    writer.write_bytes(version.wire_bytes());
    writer.flush().await?;
    Ok(version)
}

/// Read a u32-length-prefixed failure reason string.
async fn read_reason<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> Result<String> {
    let length = reader.read_u32().await? as usize;
    let bytes = reader.read_vec(length).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Client role: negotiate a security type and run its subprotocol.
///
/// `handlers` is the ordered preference list; the first kind the server
/// offers wins. `password` is consulted only by VNC authentication.
pub async fn negotiate_security<R, W>(
    reader: &mut WireReader<R>,
    writer: &mut WireWriter<W>,
    version: ProtocolVersion,
    handlers: &[SecurityKind],
    password: Option<&[u8]>,
) -> Result<SecurityKind>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let chosen = match version {
        ProtocolVersion::V3_3 => {
            // The server dictates a single scalar type.
            let type_id = reader.read_u32().await?;
            if type_id == 0 {
                let reason = read_reason(reader).await?;
                return Err(RfbError::SecurityRejected(format!(
                    "server rejected connection: {reason}"
                )));
            }
            SecurityKind::from_type_id(type_id as u8)
                .filter(|kind| handlers.contains(kind))
                .ok_or_else(|| {
                    RfbError::SecurityRejected(format!(
                        "server fixed unsupported security type {type_id}"
                    ))
                })?
        }
        ProtocolVersion::V3_7 | ProtocolVersion::V3_8 => {
            let count = reader.read_u8().await?;
            if count == 0 {
                let reason = read_reason(reader).await?;
                return Err(RfbError::SecurityRejected(format!(
                    "server offered no security types: {reason}"
                )));
            }
            let offered = reader.read_vec(count as usize).await?;
            let kind = handlers
                .iter()
                .copied()
                .find(|kind| offered.contains(&kind.type_id()))
                .ok_or_else(|| {
                    RfbError::SecurityRejected(format!(
                        "no mutually supported security type (server offered {offered:?})"
                    ))
                })?;
            writer.write_u8(kind.type_id());
            writer.flush().await?;
            kind
        }
    };

    tracing::debug!(kind = ?chosen, "security type chosen");

    match chosen {
        SecurityKind::None => {
            // 3.8 confirms even the None type with a SecurityResult; earlier
            // versions treat success as implicit.
            if version == ProtocolVersion::V3_8 {
                read_security_result(reader, version).await?;
            }
        }
        SecurityKind::VncAuth => {
            let password = password.ok_or_else(|| {
                RfbError::SecurityRejected("VNC authentication requires a password".into())
            })?;
            let mut challenge = [0u8; 16];
            reader.read_bytes(&mut challenge).await?;
            writer.write_bytes(&encrypt_challenge(&challenge, password));
            writer.flush().await?;
            read_security_result(reader, version).await?;
        }
    }

    Ok(chosen)
}

/// Read a SecurityResult word: 0 is success, 1 failure (with a reason string
/// under 3.8 only).
async fn read_security_result<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    version: ProtocolVersion,
) -> Result<()> {
    match reader.read_u32().await? {
        0 => Ok(()),
        1 => {
            let reason = if version == ProtocolVersion::V3_8 {
                read_reason(reader).await?
            } else {
                "authentication failed".to_owned()
            };
            Err(RfbError::SecurityRejected(reason))
        }
        other => Err(RfbError::protocol(format!(
            "invalid security result {other} (expected 0 or 1)"
        ))),
    }
}

/// The server role's wire halves of the handshake, mirroring the client
/// functions above step for step.
pub mod server {
    use super::*;

    /// Write our version line and read/pin the client's reply.
    pub async fn exchange_version<R, W>(
        reader: &mut WireReader<R>,
        writer: &mut WireWriter<W>,
        version: ProtocolVersion,
    ) -> Result<ProtocolVersion>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer.write_bytes(version.wire_bytes());
        writer.flush().await?;

        let mut line = [0u8; 12];
        reader.read_bytes(&mut line).await?;
        let (major, minor) = parse_version_line(&line)?;
        let client = ProtocolVersion::from_advertised(major, minor)?;
        Ok(client.min(version))
    }

    /// Offer security types and read the client's choice (3.7+), or dictate
    /// the single type (3.3).
    pub async fn offer_security<R, W>(
        reader: &mut WireReader<R>,
        writer: &mut WireWriter<W>,
        version: ProtocolVersion,
        offered: &[SecurityKind],
    ) -> Result<SecurityKind>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match version {
            ProtocolVersion::V3_3 => {
                let kind = *offered.first().ok_or_else(|| {
                    RfbError::SecurityRejected("no security types configured".into())
                })?;
                writer.write_u32(kind.type_id() as u32);
                writer.flush().await?;
                Ok(kind)
            }
            ProtocolVersion::V3_7 | ProtocolVersion::V3_8 => {
                writer.write_u8(offered.len() as u8);
                for kind in offered {
                    writer.write_u8(kind.type_id());
                }
                writer.flush().await?;

                let choice = reader.read_u8().await?;
                SecurityKind::from_type_id(choice)
                    .filter(|kind| offered.contains(kind))
                    .ok_or_else(|| {
                        RfbError::SecurityRejected(format!(
                            "client chose unoffered security type {choice}"
                        ))
                    })
            }
        }
    }

    /// Run VNC authentication server-side with the given challenge bytes.
    ///
    /// Returns whether the client's response matched; the caller still writes
    /// the SecurityResult.
    pub async fn vnc_auth_check<R, W>(
        reader: &mut WireReader<R>,
        writer: &mut WireWriter<W>,
        challenge: &[u8; 16],
        password: &[u8],
    ) -> Result<bool>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer.write_bytes(challenge);
        writer.flush().await?;

        let mut response = [0u8; 16];
        reader.read_bytes(&mut response).await?;
        Ok(response == encrypt_challenge(challenge, password))
    }

    /// Write a successful SecurityResult.
    pub async fn write_security_ok<W: AsyncWrite + Unpin>(
        writer: &mut WireWriter<W>,
    ) -> Result<()> {
        writer.write_u32(0);
        writer.flush().await?;
        Ok(())
    }

    /// Write a failed SecurityResult; 3.8 carries the reason string.
    pub async fn write_security_failure<W: AsyncWrite + Unpin>(
        writer: &mut WireWriter<W>,
        version: ProtocolVersion,
        reason: &str,
    ) -> Result<()> {
        writer.write_u32(1);
        if version == ProtocolVersion::V3_8 {
            writer.write_u32(reason.len() as u32);
            writer.write_bytes(reason.as_bytes());
        }
        writer.flush().await?;
        Ok(())
    }
}
