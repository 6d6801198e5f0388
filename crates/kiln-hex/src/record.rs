//! Intel-HEX records.

use std::fmt::{self, Write};
use std::sync::OnceLock;

use regex::Regex;

use crate::{ImageError, Result};

/// Record type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Data = 0x00,
    Eof = 0x01,
    ExtSegment = 0x02,
    StartSegment = 0x03,
    ExtLinear = 0x04,
    StartLinear = 0x05,
}

impl RecordKind {
    const fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => Self::Data,
            0x01 => Self::Eof,
            0x02 => Self::ExtSegment,
            0x03 => Self::StartSegment,
            0x04 => Self::ExtLinear,
            0x05 => Self::StartLinear,
            _ => return None,
        })
    }
}

/// One `:LLAAAATT<data>CC` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexRecord {
    pub addr: u16,
    pub kind: RecordKind,
    pub data: Vec<u8>,
}

fn record_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^:([0-9A-Fa-f]{2})([0-9A-Fa-f]{4})([0-9A-Fa-f]{2})((?:[0-9A-Fa-f]{2})*)$")
            .unwrap()
    })
}

/// `(-sum) & 0xff` over all bytes before the checksum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)).wrapping_neg()
}

fn parse_hex_bytes(s: &str) -> Vec<u8> {
    (0..s.len() / 2)
        .filter_map(|i| u8::from_str_radix(&s[2 * i..2 * i + 2], 16).ok())
        .collect()
}

impl HexRecord {
    pub const fn new(addr: u16, kind: RecordKind, data: Vec<u8>) -> Self {
        Self { addr, kind, data }
    }

    pub const fn data(addr: u16, data: Vec<u8>) -> Self {
        Self::new(addr, RecordKind::Data, data)
    }

    /// Extended linear address record selecting the 64 KiB bank `upper`.
    pub fn ext_linear(upper: u16) -> Self {
        Self::new(0, RecordKind::ExtLinear, upper.to_be_bytes().to_vec())
    }

    /// Parse one line; `line` is its 1-based number for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::BadRecord`] for malformed text or an unknown
    /// record type and [`ImageError::BadChecksum`] on a checksum mismatch.
    pub fn parse(text: &str, line: usize) -> Result<Self> {
        let bad = |reason: &str| ImageError::BadRecord {
            line,
            reason: reason.to_string(),
        };
        let caps = record_re()
            .captures(text.trim())
            .ok_or_else(|| bad("not an Intel-HEX record"))?;

        let bytes = parse_hex_bytes(&format!("{}{}{}{}", &caps[1], &caps[2], &caps[3], &caps[4]));
        let (body, tail) = bytes.split_at(bytes.len() - 1);
        let len = usize::from(body[0]);
        if body.len() != len + 4 {
            return Err(bad(&format!(
                "length byte {len} but {} data bytes",
                body.len().saturating_sub(4)
            )));
        }
        let expected = checksum(body);
        if tail[0] != expected {
            return Err(ImageError::BadChecksum {
                line,
                expected,
                actual: tail[0],
            });
        }
        let kind = RecordKind::from_u8(body[3]).ok_or_else(|| bad("unknown record type"))?;
        Ok(Self {
            addr: u16::from_be_bytes([body[1], body[2]]),
            kind,
            data: body[4..].to_vec(),
        })
    }

    /// Raw bytes from the length byte up to, not including, the checksum.
    fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 4);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.addr.to_be_bytes());
        out.push(self.kind as u8);
        out.extend_from_slice(&self.data);
        out
    }

    /// Render with a freshly computed checksum.
    pub fn encode(&self) -> String {
        let body = self.body();
        let mut s = String::with_capacity(body.len() * 2 + 3);
        s.push(':');
        for b in body.iter().chain(std::iter::once(&checksum(&body))) {
            let _ = write!(s, "{b:02X}");
        }
        s
    }

    /// Upper 16 bits selected by an extended record, if this is one.
    ///
    /// Segment records are converted, which is exact for bases on a 64 KiB
    /// boundary.
    pub fn upper_addr(&self) -> Option<u16> {
        let v = u16::from_be_bytes([*self.data.first()?, *self.data.get(1)?]);
        match self.kind {
            RecordKind::ExtLinear => Some(v),
            RecordKind::ExtSegment => Some(v >> 12),
            _ => None,
        }
    }
}

impl fmt::Display for HexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Parse every non-empty line of `text`.
///
/// # Errors
///
/// Fails on the first malformed line.
pub fn parse_records(text: &str) -> Result<Vec<HexRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| HexRecord::parse(l, i + 1))
        .collect()
}
