//! Handshake parsing and serialization.
//!
//! The first frame on a tunnel carries a compact binary header describing the
//! real destination, followed by payload bytes that must reach the
//! destination before anything else. All integers are big-endian:
//!
//! ```text
//! offset  size  field
//! 0       1     version
//! 1       16    identity token
//! 17      1     N = instructions length
//! 18      N     instructions (skipped)
//! 18+N    1     command (skipped)
//! 19+N    2     destination port
//! 21+N    1     address type (1 = IPv4, 2 = domain, 3 = IPv6)
//! 22+N    ..    address value
//! ..      rest  inline payload
//! ```
//!
//! Parsing is zero-copy and performs no I/O.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

pub const TOKEN_LEN: usize = 16;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x02;
pub const ATYP_IPV6: u8 = 0x03;

/// Command written by clients for a TCP stream. The server never reads it.
pub const CMD_TCP: u8 = 0x01;

/// Second byte of the acknowledgment frame.
pub const ACK_STATUS_OK: u8 = 0x00;

pub const MAX_DOMAIN_LEN: usize = 255;
pub const MAX_INSTRUCTIONS_LEN: usize = 255;

/// Offset of the instructions length byte.
const INSTRUCTIONS_LEN_OFFSET: usize = 1 + TOKEN_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The frame ends before a declared field does.
    Truncated,
    /// Address type tag outside {1, 2, 3}.
    InvalidAddressType,
    /// Identity token differs from the configured one.
    IdentityRejected,
    /// Domain is empty or not UTF-8.
    InvalidDomain,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::Truncated => "handshake truncated",
            ParseError::InvalidAddressType => "invalid address type",
            ParseError::IdentityRejected => "identity rejected",
            ParseError::InvalidDomain => "invalid domain",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Errors that can occur when writing a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Domain name exceeds 255 bytes.
    DomainTooLong,
    /// Domain name is empty.
    EmptyDomain,
    /// Instructions block exceeds 255 bytes.
    InstructionsTooLong,
}

/// 16-byte shared identity token.
///
/// Configured as a UUID string. `Debug` output is redacted so the token never
/// ends up in logs by accident.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token([u8; TOKEN_LEN]);

impl Token {
    pub const fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }

    /// Compares without short-circuiting on the first differing byte.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        candidate.len() == TOKEN_LEN
            && self
                .0
                .iter()
                .zip(candidate)
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(..)")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&uuid::Uuid::from_bytes(self.0).hyphenated(), f)
    }
}

/// Returned when a token string is not a UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidToken(String);

impl fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid identity token: {}", self.0)
    }
}

impl std::error::Error for InvalidToken {}

impl FromStr for Token {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim())
            .map(|id| Token(id.into_bytes()))
            .map_err(|e| InvalidToken(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRef<'a> {
    Ipv4([u8; 4]),
    Domain(&'a str),
    Ipv6([u8; 16]),
}

impl fmt::Display for HostRef<'_> {
    /// IPv6 is written as eight uncompressed lowercase groups in brackets.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRef::Ipv4(ip) => fmt::Display::fmt(&Ipv4Addr::from(*ip), f),
            HostRef::Domain(domain) => f.write_str(domain),
            HostRef::Ipv6(ip) => {
                f.write_str("[")?;
                for (i, group) in ip.chunks_exact(2).enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{:x}", u16::from_be_bytes([group[0], group[1]]))?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRef<'a> {
    pub host: HostRef<'a>,
    pub port: u16,
}

impl fmt::Display for AddressRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub version: u8,
    pub instructions: &'a [u8],
    pub command: u8,
    pub address: AddressRef<'a>,
    pub header_len: usize,
    pub payload: &'a [u8],
}

/// Parse the handshake carried by the first frame of a tunnel.
///
/// The token is checked before any byte after it is looked at, so a wrong
/// token is reported as [`ParseError::IdentityRejected`] whatever follows.
pub fn parse_request<'a>(buf: &'a [u8], expected: &Token) -> Result<Request<'a>, ParseError> {
    let version = byte_at(buf, 0)?;
    let token = slice_at(buf, 1, TOKEN_LEN)?;
    if !expected.matches(token) {
        return Err(ParseError::IdentityRejected);
    }

    let instructions_len = byte_at(buf, INSTRUCTIONS_LEN_OFFSET)? as usize;
    let mut offset = INSTRUCTIONS_LEN_OFFSET + 1;
    let instructions = slice_at(buf, offset, instructions_len)?;
    offset += instructions_len;

    let command = byte_at(buf, offset)?;
    offset += 1;

    let port = read_u16(slice_at(buf, offset, 2)?);
    offset += 2;

    let atyp = byte_at(buf, offset)?;
    offset += 1;

    let (host, host_len) = parse_host(atyp, &buf[offset..])?;
    offset += host_len;

    Ok(Request {
        version,
        instructions,
        command,
        address: AddressRef { host, port },
        header_len: offset,
        payload: &buf[offset..],
    })
}

/// Acknowledgment sent on the tunnel once the destination is connected.
#[inline]
pub fn ack_frame(version: u8) -> [u8; 2] {
    [version, ACK_STATUS_OK]
}

/// Writes a handshake header (without payload) to `buf`.
///
/// # Errors
/// - `InstructionsTooLong` if `instructions` exceeds 255 bytes.
/// - `DomainTooLong` / `EmptyDomain` for an out-of-range domain.
#[allow(clippy::cast_possible_truncation)]
pub fn write_request_header(
    buf: &mut BytesMut,
    version: u8,
    token: &Token,
    command: u8,
    instructions: &[u8],
    address: &AddressRef<'_>,
) -> Result<(), WriteError> {
    if instructions.len() > MAX_INSTRUCTIONS_LEN {
        return Err(WriteError::InstructionsTooLong);
    }
    if let HostRef::Domain(d) = &address.host {
        if d.is_empty() {
            return Err(WriteError::EmptyDomain);
        }
        if d.len() > MAX_DOMAIN_LEN {
            return Err(WriteError::DomainTooLong);
        }
    }

    buf.put_u8(version);
    buf.put_slice(token.as_bytes());
    buf.put_u8(instructions.len() as u8);
    buf.put_slice(instructions);
    buf.put_u8(command);
    buf.put_u16(address.port);
    match &address.host {
        HostRef::Ipv4(ip) => {
            buf.put_u8(ATYP_IPV4);
            buf.put_slice(ip);
        }
        HostRef::Domain(d) => {
            buf.put_u8(ATYP_DOMAIN);
            buf.put_u8(d.len() as u8);
            buf.put_slice(d.as_bytes());
        }
        HostRef::Ipv6(ip) => {
            buf.put_u8(ATYP_IPV6);
            buf.put_slice(ip);
        }
    }
    Ok(())
}

/// Decodes the address value for `atyp`, returning the host and bytes used.
fn parse_host(atyp: u8, buf: &[u8]) -> Result<(HostRef<'_>, usize), ParseError> {
    match atyp {
        ATYP_IPV4 => {
            let raw = slice_at(buf, 0, 4)?;
            Ok((HostRef::Ipv4([raw[0], raw[1], raw[2], raw[3]]), 4))
        }
        ATYP_DOMAIN => {
            let len = byte_at(buf, 0)? as usize;
            let raw = slice_at(buf, 1, len)?;
            if raw.is_empty() {
                return Err(ParseError::InvalidDomain);
            }
            let domain = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidDomain)?;
            Ok((HostRef::Domain(domain), 1 + len))
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            ip.copy_from_slice(slice_at(buf, 0, 16)?);
            Ok((HostRef::Ipv6(ip), 16))
        }
        _ => Err(ParseError::InvalidAddressType),
    }
}

#[inline]
fn byte_at(buf: &[u8], offset: usize) -> Result<u8, ParseError> {
    buf.get(offset).copied().ok_or(ParseError::Truncated)
}

#[inline]
fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let end = offset.checked_add(len).ok_or(ParseError::Truncated)?;
    buf.get(offset..end).ok_or(ParseError::Truncated)
}

#[inline]
fn read_u16(buf: &[u8]) -> u16 {
    debug_assert!(buf.len() >= 2, "read_u16 requires at least 2 bytes");
    u16::from_be_bytes([buf[0], buf[1]])
}
