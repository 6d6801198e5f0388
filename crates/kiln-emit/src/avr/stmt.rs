//! Statement lowering, prologue and epilogue for AVR.

use kiln_ir::{Binary, JmpMode, Procedure, Stmt};

use super::AvrEmitter;
use super::emitter::{FrameSlot, regs};
use crate::Result;

impl AvrEmitter {
    /// Save Y, reserve the frame and point Y just below it.
    pub(super) fn emit_prologue(&mut self, proc: &Procedure) {
        let label = self.proc_label.clone();
        self.asm.push_str(&format!(".proc {label}\n"));
        self.emit_label(&label);
        self.emit("push r29");
        self.emit("push r28");
        for _ in 0..2 * self.frame_words {
            self.emitf(format!("push r{}", regs::ZERO));
        }
        self.emitf(format!("in r28, {:#x}", regs::SPL));
        self.emitf(format!("in r29, {:#x}", regs::SPH));

        for local in proc.locals.iter().filter(|c| c.boxed) {
            self.call(if local.is_ref { "rt::mklocRef" } else { "rt::mkloc" });
            self.store_frame(FrameSlot::Local(local.index), regs::ACC);
        }
    }

    /// Drop the frame, restore Y and return with the accumulator as result.
    pub(super) fn emit_epilogue(&mut self) {
        self.pop_bytes(2 * self.frame_words);
        self.emit("pop r28");
        self.emit("pop r29");
        self.emit("ret");
        self.asm.push('\n');
    }

    pub(super) fn emit_stmt(&mut self, bin: &Binary, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.emit_expr(bin, e)?;
                self.shared.pop_drained();
            }
            Stmt::Label { id, .. } => {
                // Resolved procedures have every id set.
                if let Some(id) = id {
                    let label = self.ir_label(id.0);
                    self.emit_label(&label);
                }
            }
            Stmt::Jmp {
                mode, expr, target, ..
            } => {
                let Some(target) = target else {
                    return Err(crate::EmitError::Unresolved {
                        proc: self.proc_label.clone(),
                    });
                };
                let dest = self.ir_label(target.0);
                self.emit_jmp(bin, *mode, expr.as_ref(), &dest)?;
                self.shared.pop_drained();
            }
            Stmt::StackEmpty => self.shared.assert_empty()?,
            Stmt::Breakpoint { id, is_debugger } => {
                if self.breakpoints || *is_debugger {
                    self.emit_label(&format!("__brkp_{id}"));
                    self.emit("nop");
                }
            }
        }
        Ok(())
    }

    /// Conditional jumps skip over a long `jmp` with a short branch, so the
    /// target may be anywhere in flash.
    fn emit_jmp(
        &mut self,
        bin: &Binary,
        mode: JmpMode,
        expr: Option<&kiln_ir::Expr>,
        dest: &str,
    ) -> Result<()> {
        match mode {
            JmpMode::Always => {
                if let Some(e) = expr {
                    self.emit_expr(bin, e)?;
                }
                self.emitf(format!("jmp {dest}"));
                return Ok(());
            }
            JmpMode::IfZero | JmpMode::IfNotZero => {
                if let Some(e) = expr {
                    self.emit_expr(bin, e)?;
                }
                let acc = regs::ACC;
                self.emitf(format!("cp r{}, r{}", acc.lo(), regs::ZERO));
                self.emitf(format!("cpc r{}, r{}", acc.hi(), regs::ZERO));
            }
            JmpMode::IfJmpValEq => {
                let rhs = regs::ARGS[1];
                match expr {
                    Some(e) if e.is_simple() => self.load_simple(bin, e, rhs)?,
                    Some(e) => {
                        self.push_pair(regs::ACC);
                        self.emit_expr(bin, e)?;
                        self.mov_pair(rhs, regs::ACC);
                        self.pop_pair(regs::ACC);
                    }
                    None => self.load_imm(rhs, 0),
                }
                let acc = regs::ACC;
                self.emitf(format!("cp r{}, r{}", acc.lo(), rhs.lo()));
                self.emitf(format!("cpc r{}, r{}", acc.hi(), rhs.hi()));
            }
        }

        let skip = self.next_label("S");
        let branch = if mode == JmpMode::IfNotZero { "breq" } else { "brne" };
        self.emitf(format!("{branch} {skip}"));
        self.emitf(format!("jmp {dest}"));
        self.emit_label(&skip);
        Ok(())
    }
}
