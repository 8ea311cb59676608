use crate::error::TrackerError;

/// Normalized answer to "is anything being recorded right now?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingStatus {
    Idle,
    Running {
        customer_name: String,
        project_name: String,
        activity_name: String,
        /// `servertime - start` when the response was produced. A snapshot,
        /// not a live clock.
        elapsed_seconds: u64,
    },
    QueryFailed {
        reason: TrackerError,
    },
}

impl RecordingStatus {
    pub fn failed(reason: TrackerError) -> Self {
        Self::QueryFailed { reason }
    }
}
