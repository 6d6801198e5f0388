//! Breakpoints and stepping.
//!
//! A breakpoint fires when its id is enabled, or when `break_always` is set
//! and the frame is inside the current step scope. The scope is the break
//! frame and its ancestors: stepping over a call in frame F stops again in F
//! or in a caller of F, never inside the callee.

use tracing::debug;

use crate::{
    DebuggerCommand, FrameId, HostMessage, Result, Resume, Runtime, RuntimeError, Value, check,
};

/// Debugger state of a runtime.
#[derive(Debug, Default)]
pub struct Debugger {
    breakpoints: Vec<bool>,
    break_always: bool,
    break_frame: Option<FrameId>,
    pending: Option<Resume>,
    trace_pause_ms: u64,
}

impl Debugger {
    pub fn is_enabled(&self, id: u32) -> bool {
        self.breakpoints.get(id as usize).copied().unwrap_or(false)
    }

    pub const fn break_always(&self) -> bool {
        self.break_always
    }

    pub const fn break_frame(&self) -> Option<FrameId> {
        self.break_frame
    }

    pub const fn is_paused(&self) -> bool {
        self.pending.is_some()
    }

    /// Move the step scope to `parent` when the break frame returns, so a
    /// step that finishes a function still stops in its caller.
    pub(crate) fn frame_left(&mut self, s: FrameId, parent: FrameId) {
        if self.break_frame == Some(s) {
            self.break_frame = Some(parent);
        }
    }
}

impl Runtime {
    pub const fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// Size the breakpoint table for a program with `count` breakpoints.
    pub fn setup_debugger(&mut self, count: usize) {
        self.debugger.breakpoints = vec![false; count];
    }

    /// Whether `s` is the break frame or one of its ancestors. Every frame
    /// is in scope when no break frame is set.
    pub fn is_break_frame(&self, s: FrameId) -> bool {
        let Some(mut p) = self.debugger.break_frame else {
            return true;
        };
        loop {
            if p == s {
                return true;
            }
            match self.frames.get(p.0).and_then(|f| f.parent) {
                Some(parent) => p = parent,
                None => return false,
            }
        }
    }

    /// Whether breakpoint `id` in frame `s` should stop execution.
    pub fn should_break(&self, s: FrameId, id: u32) -> bool {
        (self.debugger.break_always && self.is_break_frame(s)) || self.debugger.is_enabled(id)
    }

    /// Stop at breakpoint `id`: park `s` at `ret_pc`, report the stack and
    /// wait for a debugger command.
    ///
    /// # Errors
    ///
    /// Fails if the debugger is already waiting on another breakpoint.
    pub fn breakpoint(
        &mut self,
        s: FrameId,
        ret_pc: i32,
        id: u32,
        r0: Value,
    ) -> Result<Option<FrameId>> {
        check(self.debugger.pending.is_none(), "debugger resume already pending")?;
        let frame = self.frame_mut(s)?;
        frame.pc = ret_pc;
        frame.r0 = r0;
        frame.last_brk_id = Some(id);

        debug!(id, pc = ret_pc, "debugger: break");
        let frames = self.snapshot(Some(s));
        self.post(HostMessage::Breakpoint {
            id: Some(id),
            pc: ret_pc,
            frames,
            exception: None,
        });
        self.debugger.pending = Some(Resume::new(s, ret_pc));
        Ok(None)
    }

    /// Report breakpoint `id` as passed and pause briefly, for step tracing.
    ///
    /// # Errors
    ///
    /// Fails if a resume is already pending.
    pub fn trace(&mut self, id: u32, s: FrameId, ret_pc: i32, r0: Value) -> Result<Option<FrameId>> {
        self.frame_mut(s)?.r0 = r0;
        self.setup_resume(s, ret_pc)?;
        self.post(HostMessage::Trace { id });
        self.pause(self.debugger.trace_pause_ms)?;
        self.check_resume_consumed()?;
        Ok(None)
    }

    /// Apply a debugger command.
    ///
    /// # Errors
    ///
    /// Returns assertion failures from the resumed execution.
    pub fn handle_debugger(&mut self, cmd: DebuggerCommand) -> Result<()> {
        match cmd {
            DebuggerCommand::Config { breakpoints } => {
                self.debugger.breakpoints.fill(false);
                for id in breakpoints {
                    let slot = self
                        .debugger
                        .breakpoints
                        .get_mut(id as usize)
                        .ok_or_else(|| RuntimeError::assertion(format!("no breakpoint {id}")))?;
                    *slot = true;
                }
                Ok(())
            }
            DebuggerCommand::TraceConfig { interval_ms } => {
                self.debugger.trace_pause_ms = interval_ms;
                Ok(())
            }
            DebuggerCommand::Pause => {
                self.debugger.break_always = true;
                self.debugger.break_frame = None;
                Ok(())
            }
            DebuggerCommand::Resume
            | DebuggerCommand::StepOver
            | DebuggerCommand::StepInto
            | DebuggerCommand::StepOut => self.continue_from_break(&cmd),
        }
    }

    fn continue_from_break(&mut self, cmd: &DebuggerCommand) -> Result<()> {
        let Some(token) = self.debugger.pending.take() else {
            return Ok(());
        };
        if self.is_dead() {
            return Ok(());
        }
        let s = token.frame();
        check(self.frame(s)?.pc == token.pc(), "debugger resumed at another pc")?;

        let dbg = &mut self.debugger;
        dbg.break_always = false;
        dbg.break_frame = None;
        match cmd {
            DebuggerCommand::StepOver => {
                dbg.break_always = true;
                dbg.break_frame = Some(s);
            }
            DebuggerCommand::StepInto => dbg.break_always = true,
            DebuggerCommand::StepOut => {
                dbg.break_always = true;
                dbg.break_frame = Some(self.frames.get(s.0).and_then(|f| f.parent).unwrap_or(s));
            }
            _ => {}
        }
        debug!(?cmd, "debugger: continue");
        self.run_loop(s)
    }
}
