//! Host side of the runtime: task queue and message channel.

use std::collections::BTreeMap;

use crate::{FrameSnapshot, Result, Runtime, Value};

/// Deferred host work.
pub type Task = Box<dyn FnOnce(&mut Runtime) -> Result<()>>;

/// Virtual-time macrotask queue. Tasks due at the same time run in the
/// order they were posted.
#[derive(Default)]
pub struct HostQueue {
    now: u64,
    seq: u64,
    tasks: BTreeMap<(u64, u64), Task>,
}

impl HostQueue {
    /// Current virtual time in milliseconds.
    pub const fn now(&self) -> u64 {
        self.now
    }

    pub fn set_timeout(&mut self, delay_ms: u64, task: Task) {
        self.seq += 1;
        self.tasks.insert((self.now + delay_ms, self.seq), task);
    }

    pub fn next_tick(&mut self, task: Task) {
        self.set_timeout(0, task);
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Earliest task, advancing the clock to its due time.
    pub(crate) fn pop(&mut self) -> Option<Task> {
        let ((due, _), task) = self.tasks.pop_first()?;
        self.now = self.now.max(due);
        Some(task)
    }
}

/// Whether the program is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Running,
    Killed,
}

/// Messages posted to the host.
#[derive(Clone, Debug, PartialEq)]
pub enum HostMessage {
    Status(RunState),
    /// Execution stopped at breakpoint `id`, or on an unhandled error when
    /// `exception` is set.
    Breakpoint {
        id: Option<u32>,
        pc: i32,
        frames: Vec<FrameSnapshot>,
        exception: Option<String>,
    },
    Trace {
        id: u32,
    },
    Value {
        channel: String,
        value: Value,
    },
}

/// Debugger requests from the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebuggerCommand {
    /// Replace the set of enabled breakpoints.
    Config { breakpoints: Vec<u32> },
    TraceConfig { interval_ms: u64 },
    Pause,
    Resume,
    StepOver,
    StepInto,
    StepOut,
}

/// Commands from the host.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCommand {
    Run,
    Debugger(DebuggerCommand),
    Event {
        source: i32,
        event: i32,
        value: Value,
    },
    Kill,
}

/// Receiver for [`HostMessage`]s.
pub trait MessageSink {
    fn post(&mut self, msg: HostMessage);
}

impl<F: FnMut(HostMessage)> MessageSink for F {
    fn post(&mut self, msg: HostMessage) {
        self(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Task {
        Box::new(|_| Ok(()))
    }

    #[test]
    fn test_queue_orders_by_time_then_post_order() {
        let mut q = HostQueue::default();
        q.set_timeout(10, noop());
        q.next_tick(noop());
        q.set_timeout(10, noop());
        assert_eq!(q.pending(), 3);

        let mut due = Vec::new();
        while q.pop().is_some() {
            due.push(q.now());
        }
        assert_eq!(due, [0, 10, 10]);
    }

    #[test]
    fn test_clock_never_runs_backwards() {
        let mut q = HostQueue::default();
        q.set_timeout(50, noop());
        q.pop();
        q.set_timeout(0, noop());
        q.pop();
        assert_eq!(q.now(), 50);
    }
}
