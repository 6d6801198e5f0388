//! kiln - retargetable backend for small devices
//!
//! Lowers procedure IR to AVR assembly or to managed program text, assembles
//! native output and links it into a firmware template image.
//!
//! # Example
//!
//! ```ignore
//! use kiln::{EmitConfig, LinkOptions, Pipeline, Target};
//!
//! let pipeline = Pipeline::new(EmitConfig::new(Target::Avr));
//! let linked = pipeline.build(&binary, &template, &["rt::print"], &LinkOptions::default())?;
//! std::fs::write("binary.hex", linked.image.to_text())?;
//! ```

// Re-export from sub-crates
pub use kiln_emit::avr::asm::{AsmError, AsmErrorKind, Assembler, Program, SymbolResolver};
pub use kiln_emit::{
    AvrEmitter, ClrEmitter, EmitConfig, EmitError, Emitter, ScriptEmitter, Target, emit_binary,
    emitter_for,
};
pub use kiln_hex::{
    Embed, HexRecord, ImageBuilder, ImageConfig, ImageError, PatchedImage, QuickFlash,
    RecordKind, extract_source, parse_records,
};
pub use kiln_ir::{Binary, CompileOptions, Expr, IrError, ProcBuilder, Procedure, Stmt};
pub use kiln_rt as rt;

pub mod metrics;
mod pipeline;
pub use pipeline::*;

use thiserror::Error;

/// Backend errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IR error: {0}")]
    Ir(#[from] IrError),
    #[error("emit error: {0}")]
    Emit(#[from] EmitError),
    #[error("assembly error: {0}")]
    Asm(#[from] AsmError),
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("runtime error: {0}")]
    Runtime(#[from] kiln_rt::RuntimeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} output cannot be linked into an image")]
    NotLinkable(Target),
}

pub type Result<T> = std::result::Result<T, Error>;
