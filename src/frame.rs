//! Cybro frame layout, encoding and decoding.
//!
//! Every exchange with a controller is carried in a fixed binary frame:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | signature, fixed `AA 55` |
//! | 2 | 2 | length = payload size + 4 (little-endian) |
//! | 4 | 4 | source NAD (little-endian) |
//! | 8 | 4 | destination NAD (little-endian) |
//! | 12 | 1 | direction (0 = request, 1 = response) |
//! | 13 | 1 | socket selector (0 = command channel) |
//! | 14 | payload | payload |
//! | 14 + payload | 2 | password field (checksum of password, or 0) |
//! | 16 + payload | 2 | frame checksum |
//!
//! The length field counts the payload plus the 2-byte password field and
//! the 2-byte checksum that follow it, not the 14-byte header. Total wire
//! size is therefore `14 + payload + 4`.
//!
//! # Network addresses
//!
//! A NAD is a 32-bit endpoint identifier. Device NADs are configured per
//! controller; ephemeral NADs tag one outstanding exchange and are drawn
//! from the reserved high range starting at [`EPHEMERAL_NAD_MIN`] and
//! spanning [`EPHEMERAL_NAD_SPAN`] addresses. [`DISCOVERY_NAD`] sits just
//! above that range and is used exclusively by discovery probes.
//!
//! # Example
//!
//! ```
//! use cybro_plc::frame::{decode, encode, Direction};
//!
//! let bytes = encode(Direction::Request, 0, 4_000_000_123, 1000, &[0x10], None);
//! let frame = decode(&bytes).unwrap();
//! assert_eq!(frame.direction, Direction::Request);
//! assert_eq!(frame.nad_from, 4_000_000_123);
//! assert_eq!(frame.nad_to, 1000);
//! assert_eq!(frame.payload, vec![0x10]);
//! ```

use crate::checksum::{checksum, password_field, verify};
use crate::error::{CybroError, Result};

/// Frame signature as it appears on the wire.
pub const FRAME_SIGNATURE: [u8; 2] = [0xAA, 0x55];

/// Fixed header size preceding the payload.
pub const FRAME_HEADER_SIZE: usize = 14;

/// Smallest possible frame: header + empty payload + password + checksum.
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + 4;

/// First NAD of the ephemeral range used to tag exchanges.
pub const EPHEMERAL_NAD_MIN: u32 = 4_000_000_000;

/// Number of NADs in the ephemeral range.
pub const EPHEMERAL_NAD_SPAN: u32 = 1_000_000;

/// Sentinel NAD used as the source of discovery probes. Sits immediately
/// above the ephemeral range so it can never be allocated for an exchange.
pub const DISCOVERY_NAD: u32 = EPHEMERAL_NAD_MIN + EPHEMERAL_NAD_SPAN;

/// Frame direction flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host-initiated request (0).
    Request,
    /// Controller response (1).
    Response,
}

impl Direction {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Direction::Request => 0,
            Direction::Response => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Self {
        // Any non-zero value is treated as a response, matching how
        // controllers in the field set the flag.
        if byte == 0 {
            Direction::Request
        } else {
            Direction::Response
        }
    }
}

/// A decoded Cybro frame.
///
/// Only frames that passed signature and checksum verification become
/// `Frame` values; semantic judgment (unexpected socket selectors, stray
/// responses) belongs to the layers above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Source NAD.
    pub nad_from: u32,
    /// Destination NAD.
    pub nad_to: u32,
    /// Direction flag.
    pub direction: Direction,
    /// Socket selector; 0 addresses the command processor, non-zero values
    /// name an application-defined push channel.
    pub socket: u8,
    /// Command or event payload.
    pub payload: Vec<u8>,
    /// Password field as received (checksum of the peer's password, or 0).
    pub password: u16,
}

/// Encodes a frame for transmission.
///
/// `password` is obfuscated through the frame checksum into the 2-byte
/// password field; `None` sends zero.
///
/// # Example
///
/// ```
/// use cybro_plc::frame::{encode, Direction, FRAME_SIGNATURE};
///
/// let bytes = encode(Direction::Request, 0, 1, 2, &[], None);
/// assert_eq!(bytes.len(), 18);
/// assert_eq!(&bytes[..2], &FRAME_SIGNATURE);
/// ```
pub fn encode(
    direction: Direction,
    socket: u8,
    nad_from: u32,
    nad_to: u32,
    payload: &[u8],
    password: Option<&str>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + 4);
    buf.extend_from_slice(&FRAME_SIGNATURE);
    buf.extend_from_slice(&((payload.len() as u16 + 4).to_le_bytes()));
    buf.extend_from_slice(&nad_from.to_le_bytes());
    buf.extend_from_slice(&nad_to.to_le_bytes());
    buf.push(direction.to_byte());
    buf.push(socket);
    buf.extend_from_slice(payload);

    let password = password.map(password_field).unwrap_or(0);
    buf.extend_from_slice(&password.to_le_bytes());

    let crc = checksum(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes a received datagram into a [`Frame`].
///
/// Decoding is side-effect-free. It fails closed with
/// [`CybroError::MalformedFrame`] if the datagram is shorter than
/// [`MIN_FRAME_SIZE`], the signature does not match, the checksum does not
/// verify, or the length field disagrees with the datagram size.
///
/// # Errors
///
/// Returns `CybroError::MalformedFrame` as described above.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(CybroError::malformed_frame(format!(
            "frame too short: expected at least {} bytes, got {}",
            MIN_FRAME_SIZE,
            bytes.len()
        )));
    }
    if bytes[..2] != FRAME_SIGNATURE {
        return Err(CybroError::malformed_frame(
            "frame signature is incorrect",
        ));
    }
    if !verify(bytes) {
        return Err(CybroError::malformed_frame("frame checksum mismatch"));
    }

    let length = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    let payload_len = length.checked_sub(4).ok_or_else(|| {
        CybroError::malformed_frame(format!("length field too small: {}", length))
    })?;
    if bytes.len() != FRAME_HEADER_SIZE + payload_len + 4 {
        return Err(CybroError::malformed_frame(format!(
            "length field {} inconsistent with datagram size {}",
            length,
            bytes.len()
        )));
    }

    let payload = bytes[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len].to_vec();
    let password_offset = FRAME_HEADER_SIZE + payload_len;
    Ok(Frame {
        nad_from: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        nad_to: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        direction: Direction::from_byte(bytes[12]),
        socket: bytes[13],
        payload,
        password: u16::from_le_bytes([bytes[password_offset], bytes[password_offset + 1]]),
    })
}
