//! Per-source event queues.
//!
//! Every `(source, event)` pair has a bounded FIFO and a list of handler
//! actions. Events are handled one at a time: each handler runs as its own
//! fiber, and the next handler or event starts only after the previous
//! fiber has completed, so handling of one pair never overlaps.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::{FinalCallback, Result, Runtime, Value};

/// Queue of one `(source, event)` pair.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Value>,
    handlers: Vec<Value>,
    /// Handler and argument pairs left for the event being handled; each
    /// handler holds a reference.
    jobs: VecDeque<(Value, Value)>,
    busy: bool,
}

impl EventQueue {
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    pub fn handlers(&self) -> &[Value] {
        &self.handlers
    }

    pub const fn is_busy(&self) -> bool {
        self.busy
    }
}

/// All event queues of a runtime.
#[derive(Debug)]
pub struct EventBus {
    depth: usize,
    queues: FxHashMap<(i32, i32), EventQueue>,
}

impl EventBus {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            queues: FxHashMap::default(),
        }
    }

    pub fn queue(&self, source: i32, event: i32) -> Option<&EventQueue> {
        self.queues.get(&(source, event))
    }
}

impl Runtime {
    pub const fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Add a handler for `(source, event)`.
    ///
    /// # Errors
    ///
    /// Fails if `handler` was destroyed.
    pub fn add_handler(&mut self, source: i32, event: i32, handler: Value) -> Result<()> {
        self.heap.incr(&handler)?;
        self.bus
            .queues
            .entry((source, event))
            .or_default()
            .handlers
            .push(handler);
        Ok(())
    }

    /// Make `handler` the only handler for `(source, event)`.
    ///
    /// # Errors
    ///
    /// Fails if `handler` or a replaced handler was destroyed.
    pub fn set_handler(&mut self, source: i32, event: i32, handler: Value) -> Result<()> {
        self.heap.incr(&handler)?;
        let q = self.bus.queues.entry((source, event)).or_default();
        let old = std::mem::replace(&mut q.handlers, vec![handler]);
        for h in &old {
            self.heap.decr(h)?;
        }
        Ok(())
    }

    /// Remove every registration of `handler`.
    ///
    /// # Errors
    ///
    /// Fails if a removed handler was destroyed.
    pub fn remove_handler(&mut self, source: i32, event: i32, handler: &Value) -> Result<()> {
        let Some(q) = self.bus.queues.get_mut(&(source, event)) else {
            return Ok(());
        };
        let before = q.handlers.len();
        q.handlers.retain(|h| h != handler);
        for _ in q.handlers.len()..before {
            self.heap.decr(handler)?;
        }
        Ok(())
    }

    /// Enqueue `value` for `(source, event)`. Dropped when the pair has no
    /// handler or its queue is full.
    ///
    /// # Errors
    ///
    /// Fails if starting the first handler fiber fails.
    pub fn queue_event(&mut self, source: i32, event: i32, value: Value) -> Result<()> {
        let depth = self.bus.depth;
        let Some(q) = self
            .bus
            .queues
            .get_mut(&(source, event))
            .filter(|q| !q.handlers.is_empty())
        else {
            trace!(source, event, "events: no handler, dropped");
            return Ok(());
        };
        if q.events.len() >= depth {
            warn!(source, event, depth, "events: queue full, dropped");
            return Ok(());
        }
        q.events.push_back(value);
        if q.busy {
            return Ok(());
        }
        q.busy = true;
        self.pump_events((source, event))
    }

    /// Start the next handler fiber of `key`, taking the next event when the
    /// current one has been handled by every handler.
    fn pump_events(&mut self, key: (i32, i32)) -> Result<()> {
        loop {
            let Some(q) = self.bus.queues.get_mut(&key) else {
                return Ok(());
            };
            if let Some((handler, arg)) = q.jobs.pop_front() {
                let done: FinalCallback = Box::new(move |rt, _| rt.pump_events(key));
                self.run_fiber(handler.clone(), vec![arg], Some(done))?;
                return self.heap.decr(&handler);
            }
            let Some(ev) = q.events.pop_front() else {
                q.busy = false;
                return Ok(());
            };
            let jobs: VecDeque<(Value, Value)> =
                q.handlers.iter().map(|h| (h.clone(), ev.clone())).collect();
            for (h, _) in &jobs {
                self.heap.incr(h)?;
            }
            if let Some(q) = self.bus.queues.get_mut(&key) {
                q.jobs = jobs;
            }
        }
    }
}
