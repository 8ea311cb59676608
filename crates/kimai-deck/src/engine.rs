//! Reconciliation: ask Kimai what is true, change it when the user asks,
//! and make the key show the answer.
//!
//! ```text
//!  poll tick / short press ──> refresh ──> getActiveRecording ──> render
//!  long press ──> getActiveRecording ─┬─ idle    ──> startRecord ──> refresh
//!                                     ├─ running ──> stopRecord  ──> refresh
//!                                     └─ failed  ──> alert
//! ```
//!
//! The toggle always acts on the status fetched for that press, never on what
//! the key currently shows, so changes made from other Kimai clients are
//! respected. Repeated long presses are not deduplicated; Kimai treats
//! start/stop as idempotent.

use kimai_proto::client::KimaiClient;
use kimai_proto::error::TrackerError;
use kimai_proto::protocol::ButtonContext;
use kimai_proto::settings::Settings;
use kimai_proto::status::RecordingStatus;
use tracing::{debug, info, warn};

use crate::gesture::Gesture;
use crate::host::HostHandle;
use crate::instance::DisplayState;
use crate::render;

/// Why a reconciliation step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Poll,
    Gesture(Gesture),
}

/// Result of one reconciliation step, reported back to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rendered(DisplayState),
    /// The key showed an alert; its title and image were left alone.
    Failed(TrackerError),
}

impl Outcome {
    pub fn display(&self) -> Option<DisplayState> {
        match self {
            Outcome::Rendered(display) => Some(*display),
            Outcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    client: KimaiClient,
    host: HostHandle,
}

impl Reconciler {
    pub fn new(client: KimaiClient, host: HostHandle) -> Self {
        Self { client, host }
    }

    pub async fn run(
        &self,
        context: &ButtonContext,
        settings: &Settings,
        trigger: Trigger,
    ) -> Outcome {
        match trigger {
            Trigger::Poll | Trigger::Gesture(Gesture::ShortPress) => {
                self.refresh(context, settings).await
            }
            Trigger::Gesture(Gesture::LongPress) => self.toggle(context, settings).await,
        }
    }

    /// Query and render. Never changes remote state.
    pub async fn refresh(&self, context: &ButtonContext, settings: &Settings) -> Outcome {
        if let Err(e) = settings.credentials() {
            return self.fail(context, e);
        }
        let status = self.client.query_active(settings).await;
        debug!("{}: status {:?}", context, status);
        match render::render_status(&self.host, context, &status) {
            Ok(display) => Outcome::Rendered(display),
            Err(e) => {
                warn!("{}: refresh failed: {}", context, e);
                Outcome::Failed(e)
            }
        }
    }

    /// Flip the remote recording state based on a fresh query, then refresh.
    pub async fn toggle(&self, context: &ButtonContext, settings: &Settings) -> Outcome {
        if let Err(e) = settings.credentials() {
            return self.fail(context, e);
        }

        let ack = match self.client.query_active(settings).await {
            RecordingStatus::Idle => {
                info!("{}: nothing running, starting recording", context);
                self.client.start_recording(settings).await
            }
            RecordingStatus::Running { .. } => {
                info!("{}: recording running, stopping it", context);
                self.client.stop_recording(settings).await
            }
            RecordingStatus::QueryFailed { reason } => return self.fail(context, reason),
        };

        match ack {
            Ok(()) => self.refresh(context, settings).await,
            Err(e) => self.fail(context, e),
        }
    }

    fn fail(&self, context: &ButtonContext, reason: TrackerError) -> Outcome {
        warn!("{}: {}", context, reason);
        self.host.show_alert(context);
        Outcome::Failed(reason)
    }
}
