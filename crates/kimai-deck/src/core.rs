/// PluginCore: single-owner event loop for all per-key state.
///
/// Host events, poll ticks and reconciliation results all arrive as
/// `PluginEvent`s on one channel. The core owns the map of key instances
/// exclusively; reconciliation steps run as spawned tasks holding a clone of
/// the key's settings and report back with `Reconciled`, so a slow Kimai
/// server never stalls other keys or the event loop.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use kimai_proto::config::Config;
use kimai_proto::protocol::{ButtonContext, HostEvent, SettingsPayload};
use kimai_proto::settings::DISPLAY_NAME_KEY;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{Outcome, Reconciler, Trigger};
use crate::host::HostHandle;
use crate::instance::{InstanceState, PollTimer};
use crate::render;

// ── PluginEvent ───────────────────────────────────────────────────────────────

/// All inputs into the PluginCore loop.
#[derive(Debug)]
pub enum PluginEvent {
    /// Decoded frame from the host connection.
    Host(HostEvent),
    /// A key's poll timer fired.
    PollTick(ButtonContext),
    /// A spawned reconciliation step finished. `generation` identifies the
    /// instance that started it.
    Reconciled {
        context: ButtonContext,
        generation: u64,
        outcome: Outcome,
    },
    /// Host connection closed.
    Shutdown,
}

// ── PluginCore ────────────────────────────────────────────────────────────────

pub struct PluginCore {
    reconciler: Reconciler,
    host: HostHandle,
    instances: HashMap<ButtonContext, InstanceState>,
    next_generation: u64,
    event_tx: mpsc::Sender<PluginEvent>,
    poll_interval: Duration,
    serialize: bool,
}

impl PluginCore {
    pub fn new(
        config: &Config,
        reconciler: Reconciler,
        host: HostHandle,
        event_tx: mpsc::Sender<PluginEvent>,
    ) -> Self {
        Self {
            reconciler,
            host,
            instances: HashMap::new(),
            next_generation: 0,
            event_tx,
            poll_interval: config.polling.interval(),
            serialize: config.reconcile.serialize,
        }
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<PluginEvent>) -> anyhow::Result<()> {
        info!(
            "PluginCore: starting event loop (poll every {:?}, serialize={})",
            self.poll_interval, self.serialize
        );

        loop {
            match event_rx.recv().await {
                None => {
                    info!("PluginCore: event channel closed, shutting down");
                    break;
                }
                Some(PluginEvent::Shutdown) => {
                    info!("PluginCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt),
            }
        }

        // Dropping the instances aborts every poll timer.
        self.instances.clear();
        Ok(())
    }

    pub fn handle_event(&mut self, evt: PluginEvent) {
        match evt {
            PluginEvent::Host(host_evt) => self.handle_host_event(host_evt),
            PluginEvent::PollTick(context) => {
                if self.instances.contains_key(&context) {
                    self.dispatch(context, Trigger::Poll);
                } else {
                    debug!("poll tick for vanished key {}", context);
                }
            }
            PluginEvent::Reconciled {
                context,
                generation,
                outcome,
            } => match self.instances.get_mut(&context) {
                Some(state) if state.generation == generation => state.finish(&outcome),
                _ => debug!("{}: dropping stale {:?}", context, outcome),
            },
            PluginEvent::Shutdown => {}
        }
    }

    fn handle_host_event(&mut self, evt: HostEvent) {
        match evt {
            HostEvent::WillAppear { context, payload } => {
                info!("{} will appear", context);
                let settings = payload.settings.unwrap_or_default();
                let needs_settings = settings.is_empty();

                self.next_generation += 1;
                let mut state = InstanceState::new(settings);
                state.generation = self.next_generation;
                state.poll_timer = Some(PollTimer::start(
                    context.clone(),
                    self.poll_interval,
                    self.event_tx.clone(),
                ));
                render::render_display_name(&self.host, &context, &state.settings);
                if needs_settings {
                    self.host.get_settings(&context);
                }
                // Replacing an existing entry drops its timer.
                self.instances.insert(context, state);
            }

            HostEvent::WillDisappear { context } => {
                info!("{} will disappear", context);
                self.instances.remove(&context);
            }

            HostEvent::KeyDown { context } => {
                if let Some(state) = live(&mut self.instances, &context) {
                    state.record_press(Instant::now());
                }
            }

            HostEvent::KeyUp { context, payload } => {
                let Some(state) = live(&mut self.instances, &context) else {
                    return;
                };
                adopt(state, payload);
                let gesture = state.take_gesture(Instant::now());
                debug!("{} released: {:?}", context, gesture);
                self.dispatch(context, Trigger::Gesture(gesture));
            }

            HostEvent::DidReceiveSettings { context, payload } => {
                let Some(state) = live(&mut self.instances, &context) else {
                    return;
                };
                adopt(state, payload);
                render::render_display_name(&self.host, &context, &state.settings);
            }

            HostEvent::SendToPlugin { context, payload } => {
                self.handle_inspector_message(context, payload);
            }

            HostEvent::Unknown => {}
        }
    }

    /// Property inspector pushes `{"sdpi_collection": {"key": .., "value": ..}}`;
    /// non-empty values are written into the key's settings and persisted.
    fn handle_inspector_message(&mut self, context: ButtonContext, payload: Value) {
        let Some(collection) = payload.get("sdpi_collection") else {
            debug!("{}: ignoring inspector payload {}", context, payload);
            return;
        };
        let key = collection
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let value = collection.get("value").cloned().unwrap_or(Value::Null);
        if key.is_empty() || !is_truthy(&value) {
            debug!("{}: ignoring empty inspector value for {:?}", context, key);
            return;
        }

        let Some(state) = live(&mut self.instances, &context) else {
            return;
        };
        state.settings.apply(key, value);
        self.host.set_settings(&context, &state.settings);
        if key == DISPLAY_NAME_KEY {
            render::render_display_name(&self.host, &context, &state.settings);
        }
    }

    fn dispatch(&mut self, context: ButtonContext, trigger: Trigger) {
        let serialize = self.serialize;
        let Some(state) = live(&mut self.instances, &context) else {
            return;
        };
        if !state.try_begin(serialize) {
            debug!(
                "{}: {} reconciliation(s) in flight, dropping {:?}",
                context,
                state.in_flight(),
                trigger
            );
            return;
        }
        let settings = state.settings.clone();
        let generation = state.generation;

        let reconciler = self.reconciler.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let outcome = reconciler.run(&context, &settings, trigger).await;
            if event_tx
                .send(PluginEvent::Reconciled {
                    context,
                    generation,
                    outcome,
                })
                .await
                .is_err()
            {
                warn!("PluginCore gone before reconciliation finished");
            }
        });
    }
}

/// State for a key the host currently shows. Only `willAppear` creates
/// state, so late events for a vanished key are dropped.
fn live<'a>(
    instances: &'a mut HashMap<ButtonContext, InstanceState>,
    context: &ButtonContext,
) -> Option<&'a mut InstanceState> {
    let state = instances.get_mut(context);
    if state.is_none() {
        debug!("{}: ignoring event for a key that is not shown", context);
    }
    state
}

fn adopt(state: &mut InstanceState, payload: SettingsPayload) {
    if let Some(settings) = payload.settings {
        state.settings = settings;
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::DisplayState;
    use crate::testing::{drain, host_pair};
    use kimai_mock::{MockKimai, Reply};
    use kimai_proto::client::KimaiClient;
    use kimai_proto::protocol::HostCommand;
    use kimai_proto::settings::Settings;
    use serde_json::json;

    struct Harness {
        core: PluginCore,
        event_rx: mpsc::Receiver<PluginEvent>,
        host_rx: mpsc::UnboundedReceiver<HostCommand>,
    }

    fn harness(serialize: bool) -> Harness {
        let mut config = Config::default();
        config.reconcile.serialize = serialize;
        harness_with(&config)
    }

    fn harness_with(config: &Config) -> Harness {
        let (host, host_rx) = host_pair();
        let (event_tx, event_rx) = mpsc::channel(64);
        let reconciler = Reconciler::new(
            KimaiClient::new(Duration::from_secs(5)).unwrap(),
            host.clone(),
        );
        Harness {
            core: PluginCore::new(config, reconciler, host, event_tx),
            event_rx,
            host_rx,
        }
    }

    impl Harness {
        fn host(&mut self, evt: HostEvent) {
            self.core.handle_event(PluginEvent::Host(evt));
        }

        /// Announce `ctx` and discard whatever that sent to the host.
        fn appear(&mut self, ctx: &ButtonContext, payload: SettingsPayload) {
            self.host(HostEvent::WillAppear {
                context: ctx.clone(),
                payload,
            });
            drain(&mut self.host_rx);
        }

        /// Wait for the next reconciliation result and feed it back.
        async fn settle(&mut self) -> Outcome {
            loop {
                match self.event_rx.recv().await {
                    Some(PluginEvent::Reconciled {
                        context,
                        generation,
                        outcome,
                    }) => {
                        self.core.handle_event(PluginEvent::Reconciled {
                            context,
                            generation,
                            outcome: outcome.clone(),
                        });
                        return outcome;
                    }
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        }
    }

    fn settings_payload(url: &str, key: &str) -> SettingsPayload {
        SettingsPayload {
            settings: Some(Settings::new(url, key)),
        }
    }

    #[tokio::test]
    async fn test_will_appear_with_empty_settings_requests_them() {
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.host(HostEvent::WillAppear {
            context: ctx.clone(),
            payload: SettingsPayload::default(),
        });

        assert_eq!(
            drain(&mut h.host_rx),
            vec![HostCommand::GetSettings { context: ctx.clone() }]
        );
        assert!(h.core.instances[&ctx].poll_timer.is_some());
    }

    #[tokio::test]
    async fn test_will_appear_renders_display_name() {
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        let mut settings = Settings::new("http://h", "k");
        settings.display_name = Some("Kimai".into());
        h.host(HostEvent::WillAppear {
            context: ctx.clone(),
            payload: SettingsPayload {
                settings: Some(settings),
            },
        });

        assert_eq!(
            drain(&mut h.host_rx),
            vec![HostCommand::SetTitle {
                context: ctx,
                title: "Kimai".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_will_disappear_drops_instance() {
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, settings_payload("http://h", "k"));
        h.host(HostEvent::WillDisappear {
            context: ctx.clone(),
        });
        assert!(!h.core.instances.contains_key(&ctx));

        // A late tick for the removed key is ignored.
        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        assert!(!h.core.instances.contains_key(&ctx));
        assert!(drain(&mut h.host_rx).is_empty());
    }

    #[tokio::test]
    async fn test_events_after_disappear_do_not_revive_key() {
        let mock = MockKimai::start(Reply::Idle).await;
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, settings_payload(&mock.url, "k"));
        h.host(HostEvent::WillDisappear {
            context: ctx.clone(),
        });

        h.host(HostEvent::KeyDown {
            context: ctx.clone(),
        });
        h.host(HostEvent::KeyUp {
            context: ctx.clone(),
            payload: settings_payload(&mock.url, "k"),
        });
        h.host(HostEvent::DidReceiveSettings {
            context: ctx.clone(),
            payload: settings_payload(&mock.url, "k"),
        });
        h.host(HostEvent::SendToPlugin {
            context: ctx.clone(),
            payload: json!({"sdpi_collection": {"key": "mynameinput", "value": "Desk"}}),
        });

        assert!(h.core.instances.is_empty());
        assert!(drain(&mut h.host_rx).is_empty());
        assert!(mock.methods().is_empty());
    }

    #[tokio::test]
    async fn test_reappear_replaces_poll_timer() {
        let mut config = Config::default();
        config.polling.interval_secs = 1;
        let mut h = harness_with(&config);
        let ctx = ButtonContext::from("c");

        h.appear(&ctx, settings_payload("http://h", "k"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.appear(&ctx, settings_payload("http://h", "k"));

        // The replacement ticks at +1.5 s and +2.5 s; a surviving first timer
        // would add ticks at +1 s and +2 s.
        let mut ticks = 0;
        let _ = tokio::time::timeout(Duration::from_millis(2300), async {
            while let Some(evt) = h.event_rx.recv().await {
                if matches!(evt, PluginEvent::PollTick(_)) {
                    ticks += 1;
                }
            }
        })
        .await;
        assert_eq!(ticks, 2);
    }

    #[tokio::test]
    async fn test_short_press_refreshes_with_key_up_settings() {
        let mock = MockKimai::start(Reply::Idle).await;
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, SettingsPayload::default());

        h.host(HostEvent::KeyDown {
            context: ctx.clone(),
        });
        h.host(HostEvent::KeyUp {
            context: ctx.clone(),
            payload: settings_payload(&mock.url, "k"),
        });

        assert_eq!(h.settle().await, Outcome::Rendered(DisplayState::Stopped));
        assert_eq!(h.core.instances[&ctx].display, DisplayState::Stopped);
        assert_eq!(mock.methods(), vec!["getActiveRecording"]);
    }

    #[tokio::test]
    async fn test_long_press_toggles() {
        let mock = MockKimai::start(Reply::Idle).await;
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");

        h.appear(&ctx, SettingsPayload::default());
        h.host(HostEvent::DidReceiveSettings {
            context: ctx.clone(),
            payload: settings_payload(&mock.url, "k"),
        });
        h.core
            .instances
            .get_mut(&ctx)
            .unwrap()
            .record_press(Instant::now() - Duration::from_millis(800));
        h.host(HostEvent::KeyUp {
            context: ctx.clone(),
            payload: SettingsPayload::default(),
        });

        assert_eq!(h.settle().await, Outcome::Rendered(DisplayState::Running));
        assert_eq!(
            mock.methods(),
            vec!["getActiveRecording", "startRecord", "getActiveRecording"]
        );
    }

    #[tokio::test]
    async fn test_poll_tick_failure_keeps_display() {
        let mock = MockKimai::start(Reply::Idle).await;
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, settings_payload(&mock.url, "k"));

        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        h.settle().await;
        assert_eq!(h.core.instances[&ctx].display, DisplayState::Stopped);
        drain(&mut h.host_rx);

        // Point the key at a dead path: the next poll fails.
        h.host(HostEvent::DidReceiveSettings {
            context: ctx.clone(),
            payload: settings_payload(&format!("{}/gone", mock.url), "k"),
        });
        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        assert!(matches!(h.settle().await, Outcome::Failed(_)));

        assert_eq!(h.core.instances[&ctx].display, DisplayState::Stopped);
        assert_eq!(
            drain(&mut h.host_rx),
            vec![HostCommand::ShowAlert { context: ctx }]
        );
    }

    #[tokio::test]
    async fn test_serialized_key_drops_overlapping_trigger() {
        let mock = MockKimai::start(Reply::Idle).await;
        let mut h = harness(true);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, settings_payload(&mock.url, "k"));

        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        assert_eq!(h.core.instances[&ctx].in_flight(), 1);

        h.settle().await;
        assert_eq!(h.core.instances[&ctx].in_flight(), 0);
        assert_eq!(mock.methods(), vec!["getActiveRecording"]);
    }

    #[tokio::test]
    async fn test_result_from_before_reappear_is_ignored() {
        let mock = MockKimai::start(Reply::Idle).await;
        let mut h = harness(true);
        let ctx = ButtonContext::from("c");

        h.appear(&ctx, settings_payload(&mock.url, "k"));
        let first = h.core.instances[&ctx].generation;
        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        h.host(HostEvent::WillDisappear {
            context: ctx.clone(),
        });
        h.appear(&ctx, settings_payload(&mock.url, "k"));
        assert_ne!(h.core.instances[&ctx].generation, first);
        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        assert_eq!(h.core.instances[&ctx].in_flight(), 1);

        // A result addressed to the earlier instance changes nothing here.
        h.core.handle_event(PluginEvent::Reconciled {
            context: ctx.clone(),
            generation: first,
            outcome: Outcome::Rendered(DisplayState::Running),
        });
        assert_eq!(h.core.instances[&ctx].in_flight(), 1);
        assert_eq!(h.core.instances[&ctx].display, DisplayState::Unknown);

        // The new instance's own step is still outstanding.
        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        assert_eq!(h.core.instances[&ctx].in_flight(), 1);

        // Both spawned steps report back; only the new instance's counts.
        h.settle().await;
        h.settle().await;
        assert_eq!(h.core.instances[&ctx].in_flight(), 0);
        assert_eq!(h.core.instances[&ctx].display, DisplayState::Stopped);
        assert_eq!(mock.methods().len(), 2);
    }

    #[tokio::test]
    async fn test_unserialized_key_allows_overlap() {
        let mock = MockKimai::start(Reply::Idle).await;
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, settings_payload(&mock.url, "k"));

        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        h.core.handle_event(PluginEvent::PollTick(ctx.clone()));
        assert_eq!(h.core.instances[&ctx].in_flight(), 2);

        h.settle().await;
        h.settle().await;
        assert_eq!(h.core.instances[&ctx].in_flight(), 0);
        assert_eq!(mock.methods().len(), 2);
    }

    #[tokio::test]
    async fn test_inspector_value_is_persisted() {
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, SettingsPayload::default());
        h.host(HostEvent::SendToPlugin {
            context: ctx.clone(),
            payload: json!({"sdpi_collection": {"key": "mynameinput", "value": "Desk"}}),
        });

        let mut expected = Settings::default();
        expected.display_name = Some("Desk".into());
        assert_eq!(
            drain(&mut h.host_rx),
            vec![
                HostCommand::SetSettings {
                    context: ctx.clone(),
                    settings: expected
                },
                HostCommand::SetTitle {
                    context: ctx,
                    title: "Desk".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_inspector_empty_value_is_ignored() {
        let mut h = harness(false);
        let ctx = ButtonContext::from("c");
        h.appear(&ctx, SettingsPayload::default());
        h.host(HostEvent::SendToPlugin {
            context: ctx.clone(),
            payload: json!({"sdpi_collection": {"key": "myurl", "value": ""}}),
        });
        h.host(HostEvent::SendToPlugin {
            context: ctx,
            payload: json!({"other": true}),
        });
        assert!(drain(&mut h.host_rx).is_empty());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(3)));
        assert!(is_truthy(&json!({})));
    }
}
