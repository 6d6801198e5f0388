//! AVR assembly emission.
//!
//! Generates text for the assembler in [`asm`]. The IR accumulator lives in
//! r24:r25 and the frame pointer in Y (r28:r29); Z (r30:r31) is scratch for
//! indirect loads.
//!
//! # Module Structure
//!
//! - `emitter` - Text helpers, register map, frame offsets and spilling
//! - `expr` - Expression lowering
//! - `stmt` - Statement lowering, prologue and epilogue
//! - `asm` - Two-pass assembler producing flash words

pub mod asm;
mod emitter;
mod expr;
mod stmt;

pub use emitter::{FrameSlot, Pair, regs};

use kiln_ir::{Binary, LiteralData, Procedure};
use tracing::debug;

use crate::config::{EmitConfig, Target};
use crate::shared::SharedStack;
use crate::{EmitError, Emitter, Result};

/// AVR assembly emitter.
pub struct AvrEmitter {
    pub(self) config: EmitConfig,
    /// Accumulated assembly text.
    pub(self) asm: String,
    /// Label of the procedure being emitted.
    pub(self) proc_label: String,
    pub(self) label_counter: usize,
    pub(self) shared: SharedStack,
    pub(self) num_args: u32,
    pub(self) num_locals: u32,
    /// Locals plus shared temporaries, in words.
    pub(self) frame_words: u32,
    pub(self) breakpoints: bool,
}

impl AvrEmitter {
    /// Create a new AVR emitter.
    #[must_use]
    pub fn new(config: EmitConfig) -> Self {
        Self {
            config,
            asm: String::new(),
            proc_label: String::new(),
            label_counter: 0,
            shared: SharedStack::new(""),
            num_args: 0,
            num_locals: 0,
            frame_words: 0,
            breakpoints: false,
        }
    }

    /// Get the accumulated assembly.
    #[must_use]
    pub fn assembly(&self) -> &str {
        &self.asm
    }

    fn reset(&mut self, bin: &Binary, proc: &Procedure) {
        self.asm = String::with_capacity(4096);
        self.proc_label = proc.label();
        self.label_counter = 0;
        self.shared = SharedStack::new(&self.proc_label);
        self.num_args = proc.args.len() as u32;
        self.num_locals = proc.locals.len() as u32;
        self.frame_words = self.num_locals + count_shared_defs(proc) as u32;
        self.breakpoints = bin.options.breakpoints || bin.options.trace;
    }
}

/// Upper bound on simultaneously live shared temporaries.
fn count_shared_defs(proc: &Procedure) -> usize {
    fn walk(e: &kiln_ir::Expr) -> usize {
        use kiln_ir::{Expr, StoreTarget};
        match e {
            Expr::Number(_) | Expr::Pointer(_) | Expr::Cell(_) | Expr::SharedRef(_) => 0,
            Expr::SharedDef { expr, .. } => 1 + walk(expr),
            Expr::Field { object, .. } => walk(object),
            Expr::Store { target, value } => {
                let t = match target {
                    StoreTarget::Cell(_) => 0,
                    StoreTarget::Field { object, .. } => walk(object),
                };
                t + walk(value)
            }
            Expr::RuntimeCall { args, .. } | Expr::ProcCall { args, .. } => {
                args.iter().map(walk).sum()
            }
            Expr::Incr(e) | Expr::Decr(e) => walk(e),
            Expr::Sequence(es) => es.iter().map(walk).sum(),
        }
    }
    proc.body
        .iter()
        .map(|s| match s {
            kiln_ir::Stmt::Expr(e) => walk(e),
            kiln_ir::Stmt::Jmp { expr: Some(e), .. } => walk(e),
            _ => 0,
        })
        .sum()
}

impl Emitter for AvrEmitter {
    fn target(&self) -> Target {
        Target::Avr
    }

    fn emit(&mut self, bin: &Binary, proc: &Procedure) -> Result<String> {
        if !proc.is_resolved() {
            return Err(EmitError::Unresolved { proc: proc.label() });
        }
        self.reset(bin, proc);
        debug!(
            proc = %self.proc_label,
            frame_words = self.frame_words,
            "avr: emitting procedure"
        );

        self.emit_prologue(proc);
        for stmt in &proc.body {
            self.emit_stmt(bin, stmt)?;
        }
        self.shared.assert_empty()?;
        self.emit_epilogue();
        Ok(std::mem::take(&mut self.asm))
    }

    fn prelude(&self, bin: &Binary) -> String {
        let mut out = String::from("; kiln avr output\n");
        for lit in &bin.literals {
            out.push_str(&format!("{}:\n", lit.label));
            match &lit.data {
                LiteralData::Str(s) => out.push_str(&format!("    .string \"{}\"\n", escape(s))),
                LiteralData::Hex(bytes) => {
                    let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                    out.push_str(&format!("    .hex {hex}\n"));
                }
            }
        }
        out
    }

    fn postlude(&self, bin: &Binary) -> String {
        let mut out = String::new();
        for class in &bin.classes {
            out.push_str(&format!("{}:\n", class.vtable_label()));
            out.push_str(&format!(
                "    .word {}, {}, {}\n",
                class.class_no,
                class.num_fields(),
                class.methods.len()
            ));
            for chunk in class.ref_mask.chunks(16) {
                let bits = chunk
                    .iter()
                    .enumerate()
                    .fold(0u16, |acc, (i, r)| if *r { acc | (1 << i) } else { acc });
                out.push_str(&format!("    .word {bits}\n"));
            }
            for m in &class.methods {
                out.push_str(&format!("    .word {m}\n"));
            }
            out.push_str(&format!("    .word {}\n", class.iface.len()));
            for slot in &class.iface {
                out.push_str(&format!("    .word {}\n", slot.as_deref().unwrap_or("0")));
            }
        }
        out
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}
