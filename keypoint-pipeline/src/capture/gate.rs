/// Single-flag backpressure: set when a `Detect` goes out, cleared when its
/// `Result` comes back.
#[derive(Debug, Default)]
pub struct BackpressureGate {
    pending: bool,
}

impl BackpressureGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Mark a request as in flight. Returns `false` if one already was.
    pub fn set(&mut self) -> bool {
        !std::mem::replace(&mut self.pending, true)
    }

    pub fn release(&mut self) {
        self.pending = false;
    }
}
