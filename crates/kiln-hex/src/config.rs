//! Template layout parameters.

use crate::{ImageError, Result};

/// Data bytes of the record opening the jump table.
pub const DEFAULT_JUMP_TABLE_MARKER: [u8; 16] = [
    0x01, 0x08, 0x01, 0x08, 0x42, 0x42, 0x42, 0x42, 0x01, 0x08, 0x01, 0x08, 0x3E, 0xD8, 0xE9, 0x8D,
];

/// Header version word written by [`ImageBuilder::stamp_header`](crate::ImageBuilder::stamp_header).
pub const HEADER_MAGIC: u16 = 0x4210;

/// Layout parameters of a firmware template.
#[derive(Clone, Debug)]
pub struct ImageConfig {
    /// Code start alignment in bytes. Must be a power of two.
    pub page_size: u32,
    /// First address past usable flash; data at or above it ends the scan.
    pub flash_usable_end: u32,
    /// Data bytes of the record that opens the jump table.
    pub jump_table_marker: Vec<u8>,
    /// Width of one jump table entry in bytes (2 or 4).
    pub pointer_bytes: usize,
    /// Jump table entries hold word addresses.
    pub word_pointers: bool,
    /// Largest accepted program in bytes.
    pub max_program_bytes: usize,
    /// Quick-flash payload alignment in bytes.
    pub quick_flash_align: usize,
    /// Largest embedded source blob in bytes, after compression.
    pub embed_limit: usize,
    /// zstd level for embedded source.
    pub embed_level: i32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            page_size: 0x400,
            flash_usable_end: 0x3C000,
            jump_table_marker: DEFAULT_JUMP_TABLE_MARKER.to_vec(),
            pointer_bytes: 2,
            word_pointers: true,
            max_program_bytes: 64000,
            quick_flash_align: 0x400,
            embed_limit: 40000,
            embed_level: 19,
        }
    }
}

impl ImageConfig {
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_flash_usable_end(mut self, end: u32) -> Self {
        self.flash_usable_end = end;
        self
    }

    #[must_use]
    pub fn with_jump_table_marker(mut self, marker: &[u8]) -> Self {
        self.jump_table_marker = marker.to_vec();
        self
    }

    /// Four-byte byte-addressed entries, as on 32-bit targets.
    #[must_use]
    pub const fn with_long_pointers(mut self) -> Self {
        self.pointer_bytes = 4;
        self.word_pointers = false;
        self
    }

    #[must_use]
    pub const fn with_max_program_bytes(mut self, max: usize) -> Self {
        self.max_program_bytes = max;
        self
    }

    #[must_use]
    pub const fn with_embed_limit(mut self, limit: usize) -> Self {
        self.embed_limit = limit;
        self
    }

    /// Check the layout parameters before a template is scanned.
    ///
    /// # Errors
    ///
    /// Fails when the page size is zero or not a power of two.
    pub const fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(ImageError::BadPageSize(self.page_size));
        }
        Ok(())
    }

    /// Round `addr` up past the page it sits in. Expects a validated page
    /// size.
    pub const fn page_after(&self, addr: u32) -> u32 {
        (addr & !(self.page_size - 1)) + self.page_size
    }
}
