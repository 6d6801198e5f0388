//! Device shim seen by the runtime.

/// Device-specific receiver supplied by the simulation or hosting shim.
pub trait Board {
    fn name(&self) -> &str;

    /// Called once when the runtime is killed.
    fn kill(&mut self) {}

    /// Refresh any visible device state.
    fn update_view(&mut self) {}
}

/// Board without devices.
#[derive(Debug, Default)]
pub struct BareBoard;

impl Board for BareBoard {
    fn name(&self) -> &str {
        "bare"
    }
}
