use std::time::{Duration, Instant};

/// Holds longer than this count as a long press.
pub const LONG_PRESS_THRESHOLD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    /// Refresh the key from the server.
    ShortPress,
    /// Toggle recording on the server.
    LongPress,
}

pub fn classify(pressed_at: Instant, released_at: Instant) -> Gesture {
    if released_at.saturating_duration_since(pressed_at) > LONG_PRESS_THRESHOLD {
        Gesture::LongPress
    } else {
        Gesture::ShortPress
    }
}
