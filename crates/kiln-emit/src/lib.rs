//! Code emission for the kiln backend.
//!
//! Three sibling emitters consume the same IR:
//!
//! - [`AvrEmitter`] - 8-bit AVR assembly, assembled by [`avr::asm`]
//! - [`ScriptEmitter`] - dynamic-scripting lowering for the simulator
//! - [`ClrEmitter`] - managed object-oriented lowering for hosted runs
//!
//! All of them walk a resolved [`Procedure`] statement by statement, keep a
//! virtual accumulator and track shared temporaries with [`SharedStack`].

pub mod avr;
mod config;
pub mod managed;
mod shared;

pub use avr::AvrEmitter;
pub use config::*;
pub use managed::{ClrEmitter, ScriptEmitter};
pub use shared::*;

use std::time::Instant;

use kiln_ir::{Binary, Procedure, SharedId};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use avr::asm::AsmError;

/// Emission errors. Every variant names the offending procedure label.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("{proc}: procedure not resolved")]
    Unresolved { proc: String },
    #[error("{proc}: shared value {id} referenced before its definition")]
    SharedUndefined { proc: String, id: SharedId },
    #[error("{proc}: shared value {id} read more than {total} times")]
    SharedOverused {
        proc: String,
        id: SharedId,
        total: u32,
    },
    #[error("{proc}: shared value {id} defined twice")]
    SharedRedefined { proc: String, id: SharedId },
    #[error("{proc}: {pending} shared values still live at stack-empty")]
    StackNotEmpty { proc: String, pending: usize },
    #[error("{proc}: call to {name} passes {count} arguments, at most {max} supported")]
    TooManyArgs {
        proc: String,
        name: String,
        count: usize,
        max: usize,
    },
    #[error("{proc}: dynamic call without a receiver")]
    MissingReceiver { proc: String },
    #[error("{proc}: immediate {value} out of range")]
    ImmediateOutOfRange { proc: String, value: i64 },
    #[error(transparent)]
    Asm(#[from] AsmError),
}

pub type Result<T> = std::result::Result<T, EmitError>;

/// A per-procedure code emitter.
pub trait Emitter {
    fn target(&self) -> Target;

    /// Lower one resolved procedure to target text.
    ///
    /// # Errors
    ///
    /// Fails on unresolved procedures, shared-value discipline violations and
    /// values the target cannot encode.
    fn emit(&mut self, bin: &Binary, proc: &Procedure) -> Result<String>;

    /// Program-level text placed before all procedures.
    fn prelude(&self, bin: &Binary) -> String;

    /// Program-level text placed after all procedures.
    fn postlude(&self, bin: &Binary) -> String;
}

/// Create a fresh emitter for `config.target`.
pub fn emitter_for(config: &EmitConfig) -> Box<dyn Emitter + Send> {
    match config.target {
        Target::Avr => Box::new(AvrEmitter::new(config.clone())),
        Target::Script => Box::new(ScriptEmitter::new(config.clone())),
        Target::Clr => Box::new(ClrEmitter::new(config.clone())),
    }
}

/// Emit every procedure of `bin` and join them with the program prelude.
///
/// Procedures are independent, so they are emitted in parallel when
/// `config.parallel` is set; output order always follows `bin.procs`.
///
/// # Errors
///
/// Returns the first procedure error in procedure order.
pub fn emit_binary(bin: &Binary, config: &EmitConfig) -> Result<String> {
    let start = Instant::now();
    let emit_one = |proc: &Procedure| -> Result<String> {
        debug!(proc = %proc.label(), target = %config.target, "emitting");
        emitter_for(config).emit(bin, proc)
    };

    let bodies: Vec<Result<String>> = if config.parallel {
        bin.procs.par_iter().map(emit_one).collect()
    } else {
        bin.procs.iter().map(emit_one).collect()
    };

    let driver = emitter_for(config);
    let mut out = driver.prelude(bin);
    for body in bodies {
        out.push_str(&body?);
    }
    out.push_str(&driver.postlude(bin));

    info!(
        target = %config.target,
        procs = bin.procs.len(),
        bytes = out.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "emitted binary"
    );
    Ok(out)
}
