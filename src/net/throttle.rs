use crate::game::state::Timestamp;

/// Drop-not-queue rate limiter for channel writes
///
/// A request inside the window is refused outright; the caller's next request
/// carries newer state anyway, so nothing is buffered.
#[derive(Debug, Clone)]
pub struct Throttle {
    window_ms: u64,
    last_fired: Option<Timestamp>,
}

impl Throttle {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_fired: None,
        }
    }

    /// Returns true (and opens a new window) if a write may go out at `now`
    pub fn try_acquire(&mut self, now: Timestamp) -> bool {
        match self.last_fired {
            Some(last) if now.saturating_sub(last) < self.window_ms => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }

    /// Forget the current window so the next request fires immediately
    pub fn reset(&mut self) {
        self.last_fired = None;
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}
