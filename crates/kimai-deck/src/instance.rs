use std::time::{Duration, Instant};

use kimai_proto::protocol::ButtonContext;
use kimai_proto::settings::Settings;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::core::PluginEvent;
use crate::engine::Outcome;
use crate::gesture::{classify, Gesture};

/// What the key was last successfully rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayState {
    /// Nothing rendered yet.
    #[default]
    Unknown,
    Stopped,
    Running,
}

/// Periodic poll for one key. The task is aborted when this is dropped.
#[derive(Debug)]
pub struct PollTimer {
    handle: tokio::task::JoinHandle<()>,
}

impl PollTimer {
    /// First tick fires one full `period` after start.
    pub fn start(
        context: ButtonContext,
        period: Duration,
        event_tx: mpsc::Sender<PluginEvent>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if event_tx
                    .send(PluginEvent::PollTick(context.clone()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("poll timer for {} exited", context);
        });
        Self { handle }
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Everything the plugin keeps for one key.
#[derive(Debug, Default)]
pub struct InstanceState {
    pub settings: Settings,
    pub last_press_at: Option<Instant>,
    pub poll_timer: Option<PollTimer>,
    pub display: DisplayState,
    /// Distinguishes this instance from earlier ones for the same key, so
    /// results of steps started before a re-appear are not applied to it.
    pub generation: u64,
    in_flight: usize,
}

impl InstanceState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn record_press(&mut self, at: Instant) {
        self.last_press_at = Some(at);
    }

    /// Classify the release against the recorded press and clear it. A
    /// release without a press is treated as a short press.
    pub fn take_gesture(&mut self, released_at: Instant) -> Gesture {
        match self.last_press_at.take() {
            Some(pressed_at) => classify(pressed_at, released_at),
            None => Gesture::ShortPress,
        }
    }

    /// Claim a reconciliation slot. With `serialize` set, at most one
    /// reconciliation may be outstanding.
    pub fn try_begin(&mut self, serialize: bool) -> bool {
        if serialize && self.in_flight > 0 {
            return false;
        }
        self.in_flight += 1;
        true
    }

    pub fn finish(&mut self, outcome: &Outcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Some(display) = outcome.display() {
            self.display = display;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}
