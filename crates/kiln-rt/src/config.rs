//! Runtime configuration.

/// Runtime limits and scheduling parameters.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Trampoline steps between cooperative yields to the host.
    pub yield_max_steps: u32,
    /// Virtual milliseconds a yield waits before continuing.
    pub yield_delay_ms: u64,
    /// Deepest allowed frame chain.
    pub max_depth: u32,
    /// Pending events kept per `(source, event)` pair.
    pub event_queue_depth: usize,
    /// Log every live object when [`Runtime::dump_live`](crate::Runtime::dump_live) runs.
    pub ref_counting_debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            yield_max_steps: 100,
            yield_delay_ms: 5,
            max_depth: 1000,
            event_queue_depth: 5,
            ref_counting_debug: false,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub const fn with_yield_max_steps(mut self, steps: u32) -> Self {
        self.yield_max_steps = steps;
        self
    }

    #[must_use]
    pub const fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub const fn with_event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth;
        self
    }

    #[must_use]
    pub const fn with_ref_counting_debug(mut self, enabled: bool) -> Self {
        self.ref_counting_debug = enabled;
        self
    }
}
