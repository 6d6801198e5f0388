//! Source embedded after the program code.
//!
//! Layout, all little-endian:
//!
//! ```text
//! 0   magic        41 14 0E 2F B8 2F A2 BB
//! 8   meta_len     u16
//! 10  packed_len   u16
//! 12  reserved     4 zero bytes
//! 16  meta         meta_len bytes of UTF-8
//! ..  packed       packed_len bytes of zstd-compressed source
//! ```
//!
//! The whole block is zero-padded to a 16-byte boundary.

use std::fmt;
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::{ImageBuilder, ImageError, Result};

/// Start of an embedded source block.
pub const SOURCE_MAGIC: [u8; 8] = [0x41, 0x14, 0x0E, 0x2F, 0xB8, 0x2F, 0xA2, 0xBB];

const HEADER_LEN: usize = 16;

/// Result of [`ImageBuilder::embed_source`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Embed {
    /// Words to append after the program.
    Packed(Vec<u16>),
    /// The packed source is over the limit and was left out.
    TooLong,
}

impl fmt::Display for Embed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packed(words) => write!(f, "; embedded source, {} words", words.len()),
            Self::TooLong => f.write_str("; program too long"),
        }
    }
}

impl ImageBuilder {
    /// Compress `blob` and frame it with `meta` for appending to the code.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Io`] if compression fails.
    pub fn embed_source(&self, meta: &str, blob: &[u8]) -> Result<Embed> {
        let config = self.config();
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), config.embed_level)?;
        encoder.write_all(blob)?;
        let packed = encoder.finish()?;

        let total = meta.len() + packed.len();
        if total > config.embed_limit || meta.len() > usize::from(u16::MAX) {
            warn!(
                bytes = total,
                limit = config.embed_limit,
                "hex: source too long, not embedded"
            );
            return Ok(Embed::TooLong);
        }

        let mut bytes = Vec::with_capacity(HEADER_LEN + total + 16);
        bytes.extend_from_slice(&SOURCE_MAGIC);
        bytes.extend_from_slice(&(meta.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(packed.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(meta.as_bytes());
        bytes.extend_from_slice(&packed);
        bytes.resize(bytes.len().next_multiple_of(16), 0);

        debug!(source = blob.len(), packed = packed.len(), "hex: source embedded");
        Ok(Embed::Packed(
            bytes
                .chunks_exact(2)
                .map(|p| u16::from_le_bytes([p[0], p[1]]))
                .collect(),
        ))
    }
}

/// Find an embedded source block in `bytes` and return its metadata and
/// decompressed source.
///
/// # Errors
///
/// Returns [`ImageError::Io`] for a truncated block or corrupt data.
pub fn extract_source(bytes: &[u8]) -> Result<Option<(String, Vec<u8>)>> {
    let Some(start) = bytes
        .windows(SOURCE_MAGIC.len())
        .position(|w| w == SOURCE_MAGIC)
    else {
        return Ok(None);
    };
    let truncated = || ImageError::Io(std::io::ErrorKind::UnexpectedEof.into());

    let block = &bytes[start..];
    let header = block.get(..HEADER_LEN).ok_or_else(truncated)?;
    let meta_len = usize::from(u16::from_le_bytes([header[8], header[9]]));
    let packed_len = usize::from(u16::from_le_bytes([header[10], header[11]]));

    let meta = block
        .get(HEADER_LEN..HEADER_LEN + meta_len)
        .ok_or_else(truncated)?;
    let packed = block
        .get(HEADER_LEN + meta_len..HEADER_LEN + meta_len + packed_len)
        .ok_or_else(truncated)?;

    let mut source = Vec::new();
    zstd::stream::Decoder::new(packed)?.read_to_end(&mut source)?;
    Ok(Some((String::from_utf8_lossy(meta).into_owned(), source)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HexRecord, ImageConfig};

    fn builder(config: ImageConfig) -> ImageBuilder {
        let mut marker = HexRecord::data(0, crate::DEFAULT_JUMP_TABLE_MARKER.to_vec()).encode();
        marker.push_str("\r\n:00000001FF\r\n");
        ImageBuilder::setup(&marker, &[], config).unwrap()
    }

    #[test]
    fn test_embed_and_extract() {
        let b = builder(ImageConfig::default());
        let source = "let x = 1;\n".repeat(200);
        let Embed::Packed(words) = b.embed_source("{\"name\":\"demo\"}", source.as_bytes()).unwrap()
        else {
            panic!("expected packed source");
        };
        assert_eq!(words.len() % 8, 0);
        assert_eq!(words[0], 0x1441);

        // Embedded after some code words.
        let mut image: Vec<u8> = [0x940c_u16, 0x0000].iter().flat_map(|w| w.to_le_bytes()).collect();
        image.extend(words.iter().flat_map(|w| w.to_le_bytes()));
        let (meta, blob) = extract_source(&image).unwrap().unwrap();
        assert_eq!(meta, "{\"name\":\"demo\"}");
        assert_eq!(blob, source.as_bytes());
    }

    #[test]
    fn test_too_long() {
        let b = builder(ImageConfig::default().with_embed_limit(8));
        let embed = b.embed_source("meta-data", b"x").unwrap();
        assert_eq!(embed, Embed::TooLong);
        assert_eq!(embed.to_string(), "; program too long");
    }

    #[test]
    fn test_extract_absent_and_truncated() {
        assert!(extract_source(&[1, 2, 3]).unwrap().is_none());

        let mut bytes = SOURCE_MAGIC.to_vec();
        bytes.extend_from_slice(&[4, 0, 4, 0, 0, 0, 0, 0, b'a']);
        assert!(matches!(extract_source(&bytes), Err(ImageError::Io(_))));
    }
}
