//! Intel-HEX image building.
//!
//! A firmware template is a prebuilt Intel-HEX file with a free-code region
//! after its last data record and a jump table whose records carry the
//! addresses of the runtime functions generated code may call. The
//! [`ImageBuilder`] locates both, resolves external symbols from the table,
//! splices assembled words into the free region and stamps the header that
//! tells the firmware where the program starts.

mod builder;
mod config;
mod embed;
mod record;

pub use builder::*;
pub use config::*;
pub use embed::*;
pub use record::*;

use thiserror::Error;

/// Image building errors.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("no jump table head found in template")]
    NoHexStart,
    #[error("no end of data found in template")]
    NoHexEnd,
    #[error("line {line}: malformed record: {reason}")]
    BadRecord { line: usize, reason: String },
    #[error("line {line}: checksum {actual:#04x}, expected {expected:#04x}")]
    BadChecksum { line: usize, expected: u8, actual: u8 },
    #[error("no address for external symbol {0}")]
    MissingSymbol(String),
    #[error("page size {0} is not a power of two")]
    BadPageSize(u32),
    #[error("program of {size} bytes exceeds the {max} byte limit")]
    ProgramTooLarge { size: usize, max: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImageError>;
