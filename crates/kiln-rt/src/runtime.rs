//! Trampoline, resume slot and fibers.

use rustc_hash::FxHashMap;
use tracing::{debug, error, trace};

use crate::arena::Arena;
use crate::{
    Board, Debugger, EventBus, FinalCallback, Frame, FrameId, FrameSnapshot, Heap, HostCommand,
    HostMessage, HostQueue, LabelFn, MessageSink, RefObject, Result, RunState, RuntimeConfig,
    RuntimeError, Task, Value, check,
};

/// The single outstanding continuation of a suspended fiber.
///
/// Only [`Runtime::get_resume`] hands one out, and it is consumed by
/// [`Runtime::resume`].
#[derive(Debug, PartialEq, Eq)]
pub struct Resume {
    frame: FrameId,
    pc: i32,
}

impl Resume {
    pub(crate) const fn new(frame: FrameId, pc: i32) -> Self {
        Self { frame, pc }
    }

    pub const fn frame(&self) -> FrameId {
        self.frame
    }

    pub const fn pc(&self) -> i32 {
        self.pc
    }
}

/// Call of a function or action on behalf of a suspended frame.
pub struct ContinuationRequest {
    pub func: LabelFn,
    pub caps: Vec<Value>,
    pub args: Vec<Value>,
    pub final_callback: Option<FinalCallback>,
}

/// What a resumed frame receives.
pub enum ResumeValue {
    /// Becomes the frame's `retval`.
    Value(Value),
    /// Run as a child of the frame; its result becomes the `retval`.
    Call(ContinuationRequest),
}

impl From<Value> for ResumeValue {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

type ErrorHandler = Box<dyn FnMut(&RuntimeError)>;

/// Execution context of one program.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub heap: Heap,
    pub host: HostQueue,
    pub(crate) frames: Arena<Frame>,
    pub(crate) debugger: Debugger,
    pub(crate) bus: EventBus,
    entry: Option<LabelFn>,
    resume: Option<Resume>,
    board: Option<Box<dyn Board>>,
    enums: FxHashMap<String, i32>,
    error_handler: Option<ErrorHandler>,
    sink: Option<Box<dyn MessageSink>>,
    outbox: Vec<HostMessage>,
    dead: bool,
    running: bool,
    in_loop: bool,
    yield_steps: u32,
    curr_frame: Option<FrameId>,
}

fn top_frame(rt: &mut Runtime, s: FrameId) -> Result<Option<FrameId>> {
    let frame = rt
        .frames
        .remove(s.0)
        .ok_or_else(|| RuntimeError::assertion("top frame already left"))?;
    if let Some(cb) = frame.final_callback {
        cb(rt, frame.retval)?;
    }
    Ok(None)
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let yield_steps = config.yield_max_steps;
        let bus = EventBus::new(config.event_queue_depth);
        Self {
            config,
            heap: Heap::new(),
            host: HostQueue::default(),
            frames: Arena::default(),
            debugger: Debugger::default(),
            bus,
            entry: None,
            resume: None,
            board: None,
            enums: FxHashMap::default(),
            error_handler: None,
            sink: None,
            outbox: Vec::new(),
            dead: false,
            running: false,
            in_loop: false,
            yield_steps,
            curr_frame: None,
        }
    }

    /// Program entry run by [`HostCommand::Run`].
    #[must_use]
    pub const fn with_entry(mut self, entry: LabelFn) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn set_error_handler(&mut self, handler: impl FnMut(&RuntimeError) + 'static) {
        self.error_handler = Some(Box::new(handler));
    }

    /// Forward host messages to `sink` instead of buffering them.
    pub fn set_message_sink(&mut self, sink: impl MessageSink + 'static) {
        self.sink = Some(Box::new(sink));
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// # Errors
    ///
    /// Fails for a frame that already left.
    pub fn frame(&self, id: FrameId) -> Result<&Frame> {
        self.frames
            .get(id.0)
            .ok_or_else(|| RuntimeError::assertion(format!("{id:?} already left")))
    }

    /// # Errors
    ///
    /// Fails for a frame that already left.
    pub fn frame_mut(&mut self, id: FrameId) -> Result<&mut Frame> {
        self.frames
            .get_mut(id.0)
            .ok_or_else(|| RuntimeError::assertion(format!("{id:?} already left")))
    }

    pub fn live_frames(&self) -> usize {
        self.frames.len()
    }

    /// Frame currently executing, or last executed.
    pub const fn current_frame(&self) -> Option<FrameId> {
        self.curr_frame
    }

    fn child_depth(&self, parent: FrameId) -> Result<u32> {
        let depth = self.frame(parent)?.depth + 1;
        if depth > self.config.max_depth {
            return Err(RuntimeError::user("Stack overflow"));
        }
        Ok(depth)
    }

    /// New frame for calling `func` from `parent`, starting at pc 0.
    ///
    /// # Errors
    ///
    /// Returns a user error past the configured depth.
    pub fn mk_frame(&mut self, parent: FrameId, func: LabelFn) -> Result<FrameId> {
        let depth = self.child_depth(parent)?;
        Ok(FrameId(self.frames.insert(Frame::new(func, Some(parent), depth))))
    }

    /// Prepare an already linked frame for its first step.
    ///
    /// # Errors
    ///
    /// Returns a user error past the configured depth.
    pub fn action_call(&mut self, s: FrameId, cb: Option<FinalCallback>) -> Result<FrameId> {
        let parent = self
            .frame(s)?
            .parent
            .ok_or_else(|| RuntimeError::assertion("action call without a parent frame"))?;
        let depth = self.child_depth(parent)?;
        let frame = self.frame_mut(s)?;
        if cb.is_some() {
            frame.final_callback = cb;
        }
        frame.depth = depth;
        frame.pc = 0;
        Ok(s)
    }

    /// Pass `v` to the parent, run the final callback and continue with the
    /// parent.
    ///
    /// # Errors
    ///
    /// Fails if the frame already left or has no parent, and with whatever
    /// the final callback returns.
    pub fn leave(&mut self, s: FrameId, v: Value) -> Result<Option<FrameId>> {
        let frame = self
            .frames
            .remove(s.0)
            .ok_or_else(|| RuntimeError::assertion(format!("{s:?} left twice")))?;
        let parent = frame
            .parent
            .ok_or_else(|| RuntimeError::assertion("leave from a frame without parent"))?;
        self.frame_mut(parent)?.retval = v.clone();
        self.debugger.frame_left(s, parent);
        if let Some(cb) = frame.final_callback {
            cb(self, v)?;
        }
        Ok(Some(parent))
    }

    /// Root frame whose completion runs `cb` with the fiber's result.
    fn setup_top_core(&mut self, cb: Option<FinalCallback>) -> FrameId {
        let mut frame = Frame::new(top_frame, None, 0);
        frame.final_callback = cb;
        FrameId(self.frames.insert(frame))
    }

    /// Root frame with a resume registered at pc 0, ready for an action to be
    /// started through [`Runtime::run_action`].
    ///
    /// # Errors
    ///
    /// Fails if a resume is already pending.
    pub fn setup_top(&mut self, cb: Option<FinalCallback>) -> Result<FrameId> {
        let top = self.setup_top_core(cb);
        self.setup_resume(top, 0)?;
        Ok(top)
    }

    // ========================================================================
    // Trampoline
    // ========================================================================

    /// Step frames until one returns `None`.
    ///
    /// User errors are reported and end the fiber; assertion errors
    /// propagate.
    ///
    /// # Errors
    ///
    /// Returns the first assertion failure.
    pub fn run_loop(&mut self, start: FrameId) -> Result<()> {
        if self.dead {
            debug!("runtime terminated");
            return Ok(());
        }
        check(!self.in_loop, "trampoline re-entered")?;
        self.in_loop = true;
        let mut next = Some(start);
        let outcome = loop {
            let Some(id) = next else {
                break Ok(());
            };
            if self.dead {
                break Ok(());
            }
            self.curr_frame = Some(id);
            let func = match self.frame(id) {
                Ok(f) => f.func,
                Err(e) => break Err(e),
            };
            match func(self, id) {
                Ok(n) => next = n,
                Err(e) => break Err(e),
            }
        };
        self.in_loop = false;
        match outcome {
            Err(e) if e.is_user() => self.report_user_error(&e),
            other => other,
        }
    }

    /// Run the entry procedure under a fresh root frame.
    ///
    /// # Errors
    ///
    /// Fails without a board or entry, or when already running.
    pub fn run(&mut self, cb: Option<FinalCallback>) -> Result<()> {
        let entry = self
            .entry
            .ok_or_else(|| RuntimeError::assertion("no entry point"))?;
        check(self.board.is_some(), "no board")?;
        check(!self.running, "already running")?;
        self.set_running(true);
        let top = self.setup_top_core(cb);
        let frame = FrameId(self.frames.insert(Frame::new(entry, Some(top), 0)));
        let frame = self.action_call(frame, None)?;
        self.run_loop(frame)
    }

    /// Count a step and, every `yield_max_steps`, park the frame at `pc` and
    /// continue it from the host queue.
    ///
    /// # Errors
    ///
    /// Fails if `s` already left.
    pub fn maybe_yield(&mut self, s: FrameId, pc: i32, r0: Value) -> Result<bool> {
        if self.yield_steps > 0 {
            self.yield_steps -= 1;
            return Ok(false);
        }
        self.yield_steps = self.config.yield_max_steps;
        let frame = self.frame_mut(s)?;
        frame.pc = pc;
        frame.r0 = r0;
        trace!(frame = ?s, pc, "runtime: yield");
        self.host.set_timeout(
            self.config.yield_delay_ms,
            Box::new(move |rt| {
                if rt.dead {
                    return Ok(());
                }
                check(rt.frame(s)?.pc == pc, "yield continued at another pc")?;
                rt.run_loop(s)
            }),
        );
        Ok(true)
    }

    // ========================================================================
    // Resume slot
    // ========================================================================

    /// Park `s` at `pc` and register it as the pending resume.
    ///
    /// # Errors
    ///
    /// Fails with "already has resume" if one is outstanding.
    pub fn setup_resume(&mut self, s: FrameId, pc: i32) -> Result<()> {
        if self.resume.is_some() {
            return Err(RuntimeError::assertion("already has resume"));
        }
        self.frame_mut(s)?.pc = pc;
        self.resume = Some(Resume::new(s, pc));
        Ok(())
    }

    /// Take the pending resume.
    ///
    /// # Errors
    ///
    /// Fails if none is pending.
    pub fn get_resume(&mut self) -> Result<Resume> {
        self.resume
            .take()
            .ok_or_else(|| RuntimeError::assertion("no resume pending"))
    }

    /// # Errors
    ///
    /// Fails with "resume not called" if the pending resume was not taken.
    pub fn check_resume_consumed(&self) -> Result<()> {
        check(self.resume.is_none(), "resume not called")
    }

    pub const fn has_pending_resume(&self) -> bool {
        self.resume.is_some()
    }

    /// Continue a suspended frame. A no-op once the runtime is dead; deferred
    /// to the host queue while the trampoline is running.
    ///
    /// # Errors
    ///
    /// Fails if the frame left or was moved to another pc since suspending.
    pub fn resume(&mut self, token: Resume, value: impl Into<ResumeValue>) -> Result<()> {
        if self.dead {
            return Ok(());
        }
        let value = value.into();
        if self.in_loop {
            self.host
                .next_tick(Box::new(move |rt| rt.resume(token, value)));
            return Ok(());
        }
        let frame = self.frame_mut(token.frame)?;
        check(frame.pc == token.pc, "resumed at another pc")?;
        match value {
            ResumeValue::Value(v) => {
                frame.retval = v;
                self.run_loop(token.frame)
            }
            ResumeValue::Call(req) => {
                let parent = token.frame;
                self.host.next_tick(Box::new(move |rt| {
                    let child = rt.mk_frame(parent, req.func)?;
                    let frame = rt.frame_mut(child)?;
                    frame.caps = req.caps;
                    frame.lambda_args = req.args;
                    frame.final_callback = req.final_callback;
                    rt.run_loop(child)
                }));
                Ok(())
            }
        }
    }

    /// Suspend the caller for `ms` of virtual time.
    ///
    /// # Errors
    ///
    /// Fails if no resume is pending.
    pub fn pause(&mut self, ms: u64) -> Result<()> {
        let token = self.get_resume()?;
        self.host
            .set_timeout(ms, Box::new(move |rt| rt.resume(token, Value::Undefined)));
        Ok(())
    }

    // ========================================================================
    // Actions and fibers
    // ========================================================================

    /// Answer the pending resume by calling `action` with `args`.
    ///
    /// A counted action stays alive until the call leaves; a bare function
    /// is called without touching any count.
    ///
    /// # Errors
    ///
    /// Fails without a pending resume or if `action` is not callable.
    pub fn run_action(&mut self, action: &Value, args: Vec<Value>) -> Result<()> {
        let token = self.get_resume()?;
        let req = match action {
            Value::Ref(id) => {
                let RefObject::Action { func, fields, .. } = self.heap.get(*id)? else {
                    return Err(RuntimeError::assertion("not an action"));
                };
                let (func, caps) = (*func, fields.clone());
                self.heap.incr(action)?;
                let held = action.clone();
                ContinuationRequest {
                    func,
                    caps,
                    args,
                    final_callback: Some(Box::new(move |rt, _| rt.heap.decr(&held))),
                }
            }
            Value::Func(func) => ContinuationRequest {
                func: *func,
                caps: Vec::new(),
                args,
                final_callback: None,
            },
            other => {
                return Err(RuntimeError::assertion(format!("cannot call {other:?}")));
            }
        };
        self.resume(token, ResumeValue::Call(req))
    }

    /// [`run_action`](Self::run_action) with exactly three arguments.
    ///
    /// # Errors
    ///
    /// As for `run_action`.
    pub fn run_action3(&mut self, action: &Value, a0: Value, a1: Value, a2: Value) -> Result<()> {
        self.run_action(action, vec![a0, a1, a2])
    }

    /// Start `action` as a new fiber on the next tick; `done` runs with its
    /// result once the fiber completes.
    ///
    /// # Errors
    ///
    /// Fails if `action` was destroyed.
    pub fn run_fiber(
        &mut self,
        action: Value,
        args: Vec<Value>,
        done: Option<FinalCallback>,
    ) -> Result<()> {
        self.heap.incr(&action)?;
        self.host.next_tick(Box::new(move |rt| {
            if rt.dead {
                return Ok(());
            }
            rt.setup_top(done)?;
            rt.run_action(&action, args)?;
            rt.heap.decr(&action)
        }));
        Ok(())
    }

    /// Run host tasks until the queue is empty; returns how many ran.
    ///
    /// # Errors
    ///
    /// Returns the first assertion failure of a task.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        let mut ran = 0;
        while let Some(task) = self.host.pop() {
            ran += 1;
            match task(self) {
                Err(e) if e.is_user() => self.report_user_error(&e)?,
                other => other?,
            }
        }
        Ok(ran)
    }

    /// Queue `task` for the next tick.
    pub fn next_tick(&mut self, task: Task) {
        self.host.next_tick(task);
    }

    // ========================================================================
    // Host channel
    // ========================================================================

    pub fn post(&mut self, msg: HostMessage) {
        trace!(?msg, "runtime: post");
        match &mut self.sink {
            Some(sink) => sink.post(msg),
            None => self.outbox.push(msg),
        }
    }

    /// Messages posted while no sink was installed.
    pub fn take_messages(&mut self) -> Vec<HostMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Apply a command from the host.
    ///
    /// # Errors
    ///
    /// Returns assertion failures of the work the command starts.
    pub fn receive(&mut self, cmd: HostCommand) -> Result<()> {
        match cmd {
            HostCommand::Run => self.run(None),
            HostCommand::Debugger(c) => self.handle_debugger(c),
            HostCommand::Event {
                source,
                event,
                value,
            } => self.queue_event(source, event, value),
            HostCommand::Kill => {
                self.kill();
                Ok(())
            }
        }
    }

    fn set_running(&mut self, running: bool) {
        if self.running != running {
            self.running = running;
            let state = if running {
                RunState::Running
            } else {
                RunState::Killed
            };
            debug!(?state, "runtime: state changed");
            self.post(HostMessage::Status(state));
        }
    }

    pub const fn is_running(&self) -> bool {
        self.running
    }

    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// Stop all further progress; pending resumes and tasks become no-ops.
    pub fn kill(&mut self) {
        self.dead = true;
        self.set_running(false);
        if let Some(board) = &mut self.board {
            board.kill();
        }
    }

    /// Frames from `s` up to the root.
    pub(crate) fn snapshot(&self, s: Option<FrameId>) -> Vec<FrameSnapshot> {
        let mut out = Vec::new();
        let mut cur = s;
        while let Some(id) = cur {
            let Some(frame) = self.frames.get(id.0) else {
                break;
            };
            out.push(FrameSnapshot::from(frame));
            cur = frame.parent;
        }
        out
    }

    fn report_user_error(&mut self, e: &RuntimeError) -> Result<()> {
        if let Some(mut handler) = self.error_handler.take() {
            handler(e);
            self.error_handler = Some(handler);
            return Ok(());
        }
        error!(error = %e, "runtime: unhandled error");
        let (id, pc) = self
            .curr_frame
            .and_then(|f| self.frames.get(f.0))
            .map_or((None, -1), |f| (f.last_brk_id, f.pc));
        let frames = self.snapshot(self.curr_frame);
        self.post(HostMessage::Breakpoint {
            id,
            pc,
            frames,
            exception: Some(e.to_string()),
        });
        Ok(())
    }

    // ========================================================================
    // Shim
    // ========================================================================

    pub fn set_board(&mut self, board: impl Board + 'static) {
        self.board = Some(Box::new(board));
    }

    /// # Errors
    ///
    /// Fails if no board is installed.
    pub fn board(&mut self) -> Result<&mut (dyn Board + 'static)> {
        match &mut self.board {
            Some(b) => Ok(b.as_mut()),
            None => Err(RuntimeError::assertion("no board")),
        }
    }

    pub fn set_enums(&mut self, enums: impl IntoIterator<Item = (String, i32)>) {
        self.enums = enums.into_iter().collect();
    }

    /// # Errors
    ///
    /// Fails for a name missing from the enum table.
    pub fn enum_value(&self, name: &str) -> Result<i32> {
        self.enums
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::assertion(format!("no enum {name}")))
    }

    /// Log every live heap object when reference-count debugging is on.
    pub fn dump_live(&self) {
        if self.config.ref_counting_debug {
            self.heap.dump_live();
        }
    }
}
