//! Expression lowering for AVR.
//!
//! Every expression leaves its value in the accumulator (r24:r25).

use kiln_ir::{Binary, CallingConvention, Cell, CellKind, Expr, ProcTarget, StoreTarget};

use super::AvrEmitter;
use super::emitter::{Pair, regs};
use crate::{EmitError, Result};

/// Two-instruction inline forms for 16-bit integer helpers.
fn inline_arith(name: &str) -> Option<(&'static str, &'static str)> {
    match name {
        "Number_::adds" => Some(("add", "adc")),
        "Number_::subs" => Some(("sub", "sbc")),
        "Number_::ands" => Some(("and", "and")),
        "Number_::orrs" => Some(("or", "or")),
        "Number_::eors" => Some(("eor", "eor")),
        _ => None,
    }
}

const fn is_leaf(e: &Expr) -> bool {
    matches!(e, Expr::Number(_) | Expr::Pointer(_) | Expr::SharedRef(_))
}

impl AvrEmitter {
    pub(super) fn emit_expr(&mut self, bin: &Binary, e: &Expr) -> Result<()> {
        match e {
            Expr::Number(_) | Expr::Pointer(_) | Expr::SharedRef(_) => {
                self.load_simple(bin, e, regs::ACC)
            }
            Expr::Cell(cell) => {
                self.load_cell(cell, regs::ACC);
                if cell.boxed {
                    self.call(if cell.is_ref { "rt::ldlocRef" } else { "rt::ldloc" });
                }
                Ok(())
            }
            Expr::Field { object, field } => {
                self.emit_expr(bin, object)?;
                if let Some(shim) = &field.shim {
                    self.call(shim);
                } else {
                    self.load_imm(regs::ARGS[1], field.index as u16);
                    self.call(if field.is_ref { "rt::ldfldRef" } else { "rt::ldfld" });
                }
                Ok(())
            }
            Expr::Store { target, value } => match target {
                StoreTarget::Cell(cell) => {
                    self.emit_expr(bin, value)?;
                    self.store_to_cell(cell);
                    Ok(())
                }
                StoreTarget::Field { object, field } => {
                    self.emit_expr(bin, object)?;
                    self.push_pair(regs::ACC);
                    self.emit_expr(bin, value)?;
                    self.mov_pair(regs::ARGS[2], regs::ACC);
                    self.pop_pair(regs::ACC);
                    self.load_imm(regs::ARGS[1], field.index as u16);
                    self.call(if field.is_ref { "rt::stfldRef" } else { "rt::stfld" });
                    Ok(())
                }
            },
            Expr::RuntimeCall {
                name,
                args,
                convention,
            } => self.emit_rt_call(bin, name, args, *convention),
            Expr::ProcCall { target, args } => self.emit_proc_call(bin, target, args),
            Expr::SharedDef {
                id,
                total_uses,
                expr,
            } => {
                self.emit_expr(bin, expr)?;
                let slot = self.shared.define(*id, *total_uses)?;
                if *total_uses > 0 {
                    let temp = self.temp_slot(slot);
                    self.store_frame(temp, regs::ACC);
                }
                Ok(())
            }
            Expr::Incr(inner) => {
                self.emit_expr(bin, inner)?;
                self.call("rt::incr");
                Ok(())
            }
            Expr::Decr(inner) => {
                self.emit_expr(bin, inner)?;
                self.call("rt::decr");
                Ok(())
            }
            Expr::Sequence(exprs) => {
                for e in exprs {
                    self.emit_expr(bin, e)?;
                }
                Ok(())
            }
        }
    }

    pub(super) fn call(&mut self, name: &str) {
        self.emitf(format!("call {name}"));
    }

    /// Load a leaf or unboxed cell into `dst` without disturbing other pairs.
    pub(super) fn load_simple(&mut self, bin: &Binary, e: &Expr, dst: Pair) -> Result<()> {
        match e {
            Expr::Number(v) => {
                if !(-32768..=65535).contains(v) {
                    return Err(EmitError::ImmediateOutOfRange {
                        proc: self.proc_label.clone(),
                        value: i64::from(*v),
                    });
                }
                self.load_imm(dst, *v as u16);
            }
            Expr::Pointer(label) => {
                let is_data = bin.literals.iter().any(|l| &l.label == label)
                    || bin.classes.iter().any(|c| &c.vtable_label() == label);
                self.load_label(dst, label, !is_data);
            }
            Expr::SharedRef(id) => {
                let slot = self.shared.use_ref(*id)?;
                let temp = self.temp_slot(slot);
                self.load_frame(dst, temp);
            }
            Expr::Cell(cell) if !cell.boxed => self.load_cell(cell, dst),
            _ => {
                self.emit_expr(bin, e)?;
                self.mov_pair(dst, regs::ACC);
            }
        }
        Ok(())
    }

    pub(super) fn load_cell(&mut self, cell: &Cell, dst: Pair) {
        match cell.kind {
            CellKind::Local => self.load_frame(dst, super::FrameSlot::Local(cell.index)),
            CellKind::Arg => {
                let slot = self.arg_slot(cell.index);
                self.load_frame(dst, slot);
            }
            CellKind::Capture => {
                self.load_indirect(dst, regs::CLOSURE, cell.index, Self::action_header());
            }
            CellKind::Global => self.load_indirect(dst, regs::GLOBALS, cell.index, 0),
        }
    }

    fn store_cell(&mut self, cell: &Cell, src: Pair) {
        match cell.kind {
            CellKind::Local => self.store_frame(super::FrameSlot::Local(cell.index), src),
            CellKind::Arg => {
                let slot = self.arg_slot(cell.index);
                self.store_frame(slot, src);
            }
            CellKind::Capture => {
                self.store_indirect(regs::CLOSURE, cell.index, Self::action_header(), src);
            }
            CellKind::Global => self.store_indirect(regs::GLOBALS, cell.index, 0, src),
        }
    }

    /// Store the accumulator into `cell`, narrowing and ref-counting as the
    /// cell requires.
    fn store_to_cell(&mut self, cell: &Cell) {
        if let Some(conv) = cell.bit_size.converter() {
            self.call(&format!("rt::{conv}"));
        }
        if cell.boxed {
            self.mov_pair(regs::ARGS[1], regs::ACC);
            self.load_cell(cell, regs::ACC);
            self.call(if cell.is_ref { "rt::stlocRef" } else { "rt::stloc" });
            return;
        }
        if cell.is_ref {
            self.push_pair(regs::ACC);
            self.load_cell(cell, regs::ACC);
            self.call("rt::decr");
            self.pop_pair(regs::ACC);
        }
        self.store_cell(cell, regs::ACC);
    }

    /// Runtime calls pass up to four arguments in r24, r22, r20 and r18.
    ///
    /// Suspending and promise calls are plain calls on the device: its
    /// scheduler switches fibers inside the callee.
    fn emit_rt_call(
        &mut self,
        bin: &Binary,
        name: &str,
        args: &[Expr],
        convention: CallingConvention,
    ) -> Result<()> {
        let max = self.config.max_reg_args.min(regs::ARGS.len());
        if args.len() > max {
            return Err(EmitError::TooManyArgs {
                proc: self.proc_label.clone(),
                name: name.to_string(),
                count: args.len(),
                max,
            });
        }
        if convention != CallingConvention::Plain {
            self.emit_comment(format!("{convention:?} call {name}"));
        }

        let all_simple = args.iter().all(Expr::is_simple);
        let direct = |e: &Expr| if all_simple { e.is_simple() } else { is_leaf(e) };

        for a in args.iter().filter(|&a| !direct(a)) {
            self.emit_expr(bin, a)?;
            self.push_pair(regs::ACC);
        }
        for (i, _) in args.iter().enumerate().rev().filter(|&(_, a)| !direct(a)) {
            self.pop_pair(regs::ARGS[i]);
        }
        for (i, a) in args.iter().enumerate().filter(|&(_, a)| direct(a)) {
            self.load_simple(bin, a, regs::ARGS[i])?;
        }

        match inline_arith(name) {
            Some((lo, hi)) if args.len() == 2 => {
                let (a, b) = (regs::ARGS[0], regs::ARGS[1]);
                self.emitf(format!("{lo} r{}, r{}", a.lo(), b.lo()));
                self.emitf(format!("{hi} r{}, r{}", a.hi(), b.hi()));
            }
            _ => self.call(name),
        }
        Ok(())
    }

    /// Procedure calls push every argument, call, then drop the arguments.
    fn emit_proc_call(&mut self, bin: &Binary, target: &ProcTarget, args: &[Expr]) -> Result<()> {
        for a in args {
            self.emit_expr(bin, a)?;
            self.push_pair(regs::ACC);
        }
        let n = args.len() as u32;

        match target {
            ProcTarget::Static(label) => self.call(label),
            ProcTarget::Virtual { index } | ProcTarget::Interface { index, .. } => {
                if args.is_empty() {
                    return Err(EmitError::MissingReceiver {
                        proc: self.proc_label.clone(),
                    });
                }
                // The receiver was pushed first, so it sits deepest.
                self.emitf(format!("in r30, {:#x}", regs::SPL));
                self.emitf(format!("in r31, {:#x}", regs::SPH));
                self.load_word(regs::ACC, super::emitter::Base::Z, 2 * n - 1);
                self.load_imm(regs::ARGS[1], *index as u16);
                match target {
                    ProcTarget::Interface { map: Some(m), .. } => {
                        self.load_imm(regs::ARGS[2], m.key as u16);
                        self.load_imm(regs::ARGS[3], u16::from(m.is_set));
                        self.call("rt::fetchMethodIfaceMap");
                    }
                    ProcTarget::Interface { .. } => self.call("rt::fetchMethodIface"),
                    _ => self.call("rt::fetchMethod"),
                }
                self.mov_pair(regs::Z, regs::ACC);
                self.emit("icall");
            }
        }

        self.pop_bytes(2 * n);
        Ok(())
    }
}
