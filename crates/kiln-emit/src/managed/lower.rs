//! Expression and statement lowering shared by the managed dialects.
//!
//! The accumulator is the function-local `r0`. Simple operands are rendered
//! directly into the consuming statement; everything else is evaluated into
//! `r0` first.

use kiln_ir::{
    Binary, CallingConvention, Cell, CellKind, Expr, JmpMode, Procedure, ProcTarget, Stmt,
    StoreTarget,
};

use super::{Dialect, ManagedEmitter};
use crate::{EmitError, Result};

/// Operators rendered inline instead of through a runtime call.
fn binary_op(name: &str) -> Option<&'static str> {
    match name {
        "Number_::adds" => Some("+"),
        "Number_::subs" => Some("-"),
        "Number_::muls" => Some("*"),
        "Number_::ands" => Some("&"),
        "Number_::orrs" => Some("|"),
        "Number_::eors" => Some("^"),
        "Number_::lsls" => Some("<<"),
        "Number_::asrs" => Some(">>"),
        "Number_::lt" => Some("<"),
        "Number_::le" => Some("<="),
        "Number_::gt" => Some(">"),
        "Number_::ge" => Some(">="),
        _ => None,
    }
}

const fn is_leaf(e: &Expr) -> bool {
    matches!(e, Expr::Number(_) | Expr::Pointer(_) | Expr::SharedRef(_))
}

impl<D: Dialect> ManagedEmitter<D> {
    // ========================================================================
    // Text helpers
    // ========================================================================

    fn write(&mut self, line: &str) {
        self.code.push_str("    ");
        self.code.push_str(line);
        self.code.push('\n');
    }

    fn write_raw(&mut self, text: &str) {
        self.code.push_str(text);
        if !text.ends_with('\n') {
            self.code.push('\n');
        }
    }

    fn comment(&mut self, text: &str) {
        if self.config.emit_comments {
            self.write(&format!("// {text}"));
        }
    }

    /// `ns::name` to a member access on the runtime object.
    fn rt_name(&self, name: &str) -> String {
        match name.split_once("::") {
            Some(("rt", member)) => format!("{}.{member}", self.config.runtime_name),
            Some((ns, member)) => format!("{}.{ns}.{member}", self.config.runtime_name),
            None => format!("{}.{name}", self.config.runtime_name),
        }
    }

    fn rt(&self, member: &str) -> String {
        format!("{}.{member}", self.config.runtime_name)
    }

    fn fresh_case(&mut self) -> u32 {
        let n = self.next_case;
        self.next_case += 1;
        n
    }

    fn enter_case(&mut self, n: u32) {
        self.entered.insert(n);
        let text = D::case(n);
        self.write_raw(&text);
    }

    // ========================================================================
    // Procedure frame
    // ========================================================================

    pub(super) fn emit_prologue(&mut self, proc: &Procedure) {
        let open = D::open(&self.proc_label, &self.config.runtime_name);
        self.write_raw(&open);
        self.enter_case(0);

        for local in &proc.locals {
            let init = if local.boxed {
                let helper = if local.is_ref { "mklocRef" } else { "mkloc" };
                format!("{}()", self.rt(helper))
            } else {
                D::UNDEFINED.to_string()
            };
            self.write(&format!("{} = {init};", Self::locref(local)));
        }

        if !proc.args.is_empty() {
            self.write("if (s.lambdaArgs != null) {");
            for (i, arg) in proc.args.iter().enumerate() {
                self.write(&format!("    {} = s.lambdaArgs[{i}];", Self::locref(arg)));
            }
            self.write("    s.lambdaArgs = null;");
            self.write("}");
        }
    }

    pub(super) fn emit_epilogue(&mut self) {
        let leave = self.rt("leave");
        self.write(&format!("return {leave}(s, r0);"));
        let close = D::close(&self.config.runtime_name);
        self.write_raw(&close);
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub(super) fn emit_stmt(&mut self, bin: &Binary, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.emit_expr(bin, e)?;
                self.shared.pop_drained();
            }
            Stmt::Label { id, .. } => {
                if let Some(id) = id {
                    self.enter_case(id.0);
                }
            }
            Stmt::Jmp {
                mode, expr, target, ..
            } => {
                let Some(target) = target else {
                    return Err(EmitError::Unresolved {
                        proc: self.proc_label.clone(),
                    });
                };
                self.emit_jmp(bin, *mode, expr.as_ref(), target.0)?;
                self.shared.pop_drained();
            }
            Stmt::StackEmpty => self.shared.assert_empty()?,
            Stmt::Breakpoint { id, is_debugger } => self.emit_breakpoint(*id, *is_debugger),
        }
        Ok(())
    }

    fn emit_jmp(&mut self, bin: &Binary, mode: JmpMode, expr: Option<&Expr>, n: u32) -> Result<()> {
        let goto = D::goto(n, self.entered.contains(&n));
        match mode {
            JmpMode::Always => {
                if let Some(e) = expr {
                    self.emit_expr(bin, e)?;
                }
                self.write(&goto);
            }
            JmpMode::IfZero | JmpMode::IfNotZero => {
                if let Some(e) = expr {
                    self.emit_expr(bin, e)?;
                }
                let cond = D::truthy(&self.config.runtime_name, "r0");
                if mode == JmpMode::IfZero {
                    self.write(&format!("if (!{cond}) {goto}"));
                } else {
                    self.write(&format!("if ({cond}) {goto}"));
                }
            }
            JmpMode::IfJmpValEq => match expr {
                Some(e) if e.is_simple() => {
                    let v = self.operand(bin, e)?;
                    self.write(&format!("if ({}) {goto}", D::same("r0", &v)));
                }
                Some(e) => {
                    self.write("s.jv = r0;");
                    self.emit_expr(bin, e)?;
                    self.write(&format!(
                        "if ({}) {{ r0 = s.jv; {goto} }}",
                        D::same("r0", "s.jv")
                    ));
                    self.write("r0 = s.jv;");
                }
                None => {
                    self.write(&format!("if ({}) {goto}", D::same("r0", D::UNDEFINED)));
                }
            },
        }
        Ok(())
    }

    /// Compiler breakpoints fire on demand; `debugger` statements always do.
    fn emit_breakpoint(&mut self, id: u32, is_debugger: bool) {
        if !(self.breakpoints || self.trace || is_debugger) {
            return;
        }
        self.write(&format!("s.lastBrkId = {id};"));
        let n = self.fresh_case();
        let brk = format!("return {}(s, {n}, {id}, r0);", self.rt("breakpoint"));
        let trace = format!("return {}({id}, s, {n}, r0);", self.rt("trace"));

        if is_debugger {
            self.write(&brk);
        } else if self.breakpoints {
            self.write(&format!(
                "if (({} && {}(s)) || breakpoints[{id}]) {brk}",
                self.rt("breakAlways"),
                self.rt("isBreakFrame")
            ));
            if self.trace {
                self.write(&format!("else {trace}"));
            }
        } else {
            self.write(&trace);
        }
        self.enter_case(n);
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn locref(cell: &Cell) -> String {
        match cell.kind {
            CellKind::Global => format!("globals.{}", cell.unique_name()),
            CellKind::Capture => format!("s.caps[{}]", cell.index),
            CellKind::Local | CellKind::Arg => format!("s.{}", cell.unique_name()),
        }
    }

    /// Render `e` as an operand. Simple expressions are rendered in place
    /// without touching `r0`; anything else is evaluated into `r0`.
    fn operand(&mut self, bin: &Binary, e: &Expr) -> Result<String> {
        Ok(match e {
            Expr::Number(v) => v.to_string(),
            Expr::Pointer(label) => label.clone(),
            Expr::SharedRef(id) => format!("s.tmp_{}", self.shared.use_ref(*id)?),
            Expr::Cell(cell) if !cell.boxed => Self::locref(cell),
            _ => {
                self.emit_expr(bin, e)?;
                "r0".to_string()
            }
        })
    }

    /// Evaluate call arguments left to right into renderable operands.
    ///
    /// When every argument is simple they are rendered in place. Otherwise
    /// compound arguments and cells are evaluated in order and parked in
    /// `s.ca<depth>_<i>` so later arguments cannot clobber them.
    fn flatten_args(&mut self, bin: &Binary, args: &[&Expr]) -> Result<Vec<String>> {
        if args.iter().all(|a| a.is_simple()) {
            return args.iter().map(|a| self.operand(bin, a)).collect();
        }
        let depth = self.stash_depth;
        self.stash_depth += 1;
        let mut out = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            if is_leaf(a) {
                out.push(self.operand(bin, a)?);
                continue;
            }
            self.emit_expr(bin, a)?;
            let slot = format!("s.ca{depth}_{i}");
            self.write(&format!("{slot} = r0;"));
            out.push(slot);
        }
        self.stash_depth -= 1;
        Ok(out)
    }

    pub(super) fn emit_expr(&mut self, bin: &Binary, e: &Expr) -> Result<()> {
        match e {
            Expr::Number(_) | Expr::Pointer(_) | Expr::SharedRef(_) => {
                let v = self.operand(bin, e)?;
                self.write(&format!("r0 = {v};"));
            }
            Expr::Cell(cell) if cell.boxed => {
                let helper = if cell.is_ref { "ldlocRef" } else { "ldloc" };
                let ld = self.rt(helper);
                self.write(&format!("r0 = {ld}({});", Self::locref(cell)));
            }
            Expr::Cell(cell) => self.write(&format!("r0 = {};", Self::locref(cell))),
            Expr::Field { object, field } => {
                let obj = self.operand(bin, object)?;
                if let Some(shim) = &field.shim {
                    let shim = self.rt_name(shim);
                    self.write(&format!("r0 = {shim}({obj});"));
                } else {
                    let helper = if field.is_ref { "ldfldRef" } else { "ldfld" };
                    let ld = self.rt(helper);
                    self.write(&format!("r0 = {ld}({obj}, {});", field.index));
                }
            }
            Expr::Store { target, value } => match target {
                StoreTarget::Cell(cell) => self.emit_store_cell(bin, cell, value)?,
                StoreTarget::Field { object, field } => {
                    let ops = self.flatten_args(bin, &[&**object, &**value])?;
                    let helper = if field.is_ref { "stfldRef" } else { "stfld" };
                    let st = self.rt(helper);
                    self.write(&format!("{st}({}, {}, {});", ops[0], field.index, ops[1]));
                }
            },
            Expr::RuntimeCall {
                name,
                args,
                convention,
            } => self.emit_rt_call(bin, name, args, *convention)?,
            Expr::ProcCall { target, args } => self.emit_proc_call(bin, target, args)?,
            Expr::SharedDef {
                id,
                total_uses,
                expr,
            } => {
                self.emit_expr(bin, expr)?;
                let slot = self.shared.define(*id, *total_uses)?;
                if *total_uses > 0 {
                    self.write(&format!("s.tmp_{slot} = r0;"));
                }
            }
            Expr::Incr(inner) => {
                self.emit_expr(bin, inner)?;
                let f = self.rt("incr");
                self.write(&format!("{f}(r0);"));
            }
            Expr::Decr(inner) => {
                self.emit_expr(bin, inner)?;
                let f = self.rt("decr");
                self.write(&format!("{f}(r0);"));
            }
            Expr::Sequence(exprs) => {
                for e in exprs {
                    self.emit_expr(bin, e)?;
                }
            }
        }
        Ok(())
    }

    fn emit_store_cell(&mut self, bin: &Binary, cell: &Cell, value: &Expr) -> Result<()> {
        let mut src = self.operand(bin, value)?;
        if let Some(conv) = cell.bit_size.converter() {
            src = format!("{}({src})", self.rt(conv));
        }
        let dst = Self::locref(cell);
        if cell.boxed {
            let helper = if cell.is_ref { "stlocRef" } else { "stloc" };
            let st = self.rt(helper);
            self.write(&format!("{st}({dst}, {src});"));
            return Ok(());
        }
        if cell.is_ref {
            let decr = self.rt("decr");
            self.write(&format!("{decr}({dst});"));
        }
        self.write(&format!("{dst} = {src};"));
        Ok(())
    }

    fn emit_rt_call(
        &mut self,
        bin: &Binary,
        name: &str,
        args: &[Expr],
        convention: CallingConvention,
    ) -> Result<()> {
        let args: Vec<&Expr> = args.iter().collect();
        let ops = self.flatten_args(bin, &args)?;
        let text = match binary_op(name) {
            Some(op) if ops.len() == 2 => format!("({} {op} {})", ops[0], ops[1]),
            _ => format!("{}({})", self.rt_name(name), ops.join(", ")),
        };

        match convention {
            CallingConvention::Plain => self.write(&format!("r0 = {text};")),
            CallingConvention::Suspend => {
                let n = self.fresh_case();
                let setup = self.rt("setupResume");
                let check = self.rt("checkResumeConsumed");
                self.write(&format!("{setup}(s, {n});"));
                self.write(&format!("{text};"));
                self.write(&format!("{check}();"));
                self.write("return null;");
                self.enter_case(n);
                self.write("r0 = s.retval;");
            }
            CallingConvention::Promise => {
                let n = self.fresh_case();
                let resume = format!("{}(s, {n})", self.rt("buildResume"));
                self.write(&D::promise(&text, &resume));
                self.write("return null;");
                self.enter_case(n);
                self.write("r0 = s.retval;");
            }
        }
        Ok(())
    }

    /// Calls hand a fresh callee frame back to the trampoline and resume at a
    /// new `case` with the callee's return value.
    fn emit_proc_call(&mut self, bin: &Binary, target: &ProcTarget, args: &[Expr]) -> Result<()> {
        let args: Vec<&Expr> = args.iter().collect();
        let ops = self.flatten_args(bin, &args)?;
        let n = self.fresh_case();
        let mk = self.rt("mkFrame");

        let callee = match target {
            ProcTarget::Static(label) => label.clone(),
            ProcTarget::Virtual { index } | ProcTarget::Interface { index, .. } => {
                let Some(recv) = ops.first() else {
                    return Err(EmitError::MissingReceiver {
                        proc: self.proc_label.clone(),
                    });
                };
                let table = if matches!(target, ProcTarget::Virtual { .. }) {
                    "methods"
                } else {
                    "iface"
                };
                format!("{recv}.vtable.{table}[{index}]")
            }
        };

        let mut call = vec![format!("s.callee = {mk}(s, {callee});")];
        call.extend(
            ops.iter()
                .enumerate()
                .map(|(i, op)| format!("s.callee.arg{i} = {op};")),
        );
        call.push(format!("s.pc = {n};"));
        call.push("return s.callee;".to_string());

        if let ProcTarget::Interface { map: Some(m), .. } = target {
            let recv = &ops[0];
            self.comment(&format!("map fast path for key {}", m.key));
            let fast = if m.is_set {
                let value = ops.get(1).map_or(D::UNDEFINED, String::as_str);
                format!("{}({recv}, {}, {value})", self.rt("mapSet"), m.key)
            } else {
                format!("{}({recv}, {})", self.rt("mapGet"), m.key)
            };
            let is_map = D::same(&format!("{recv}.vtable"), &self.rt("MAP_VTABLE"));
            self.write(&format!("if ({is_map}) {{"));
            self.write(&format!("    s.retval = {fast};"));
            self.write(&format!("    {}", D::goto(n, false)));
            self.write("}");
        }
        for line in &call {
            self.write(line);
        }
        self.enter_case(n);
        self.write("r0 = s.retval;");
        Ok(())
    }
}
