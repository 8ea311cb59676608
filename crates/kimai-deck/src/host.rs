use kimai_proto::protocol::{ButtonContext, HostCommand};
use kimai_proto::settings::Settings;
use tokio::sync::mpsc;
use tracing::warn;

/// Fire-and-forget handle onto the host's capability surface.
///
/// Commands are queued on an unbounded channel drained by the connection
/// writer task, so calling these never blocks a reconciliation step.
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostCommand>,
}

impl HostHandle {
    pub fn new(tx: mpsc::UnboundedSender<HostCommand>) -> Self {
        Self { tx }
    }

    pub fn register(&self, register_event: &str, uuid: &str) {
        self.send(HostCommand::Register {
            register_event: register_event.to_string(),
            uuid: uuid.to_string(),
        });
    }

    pub fn set_title(&self, context: &ButtonContext, title: impl Into<String>) {
        self.send(HostCommand::SetTitle {
            context: context.clone(),
            title: title.into(),
        });
    }

    pub fn set_image(&self, context: &ButtonContext, image: impl Into<String>) {
        self.send(HostCommand::SetImage {
            context: context.clone(),
            image: image.into(),
        });
    }

    pub fn show_alert(&self, context: &ButtonContext) {
        self.send(HostCommand::ShowAlert {
            context: context.clone(),
        });
    }

    pub fn get_settings(&self, context: &ButtonContext) {
        self.send(HostCommand::GetSettings {
            context: context.clone(),
        });
    }

    pub fn set_settings(&self, context: &ButtonContext, settings: &Settings) {
        self.send(HostCommand::SetSettings {
            context: context.clone(),
            settings: settings.clone(),
        });
    }

    fn send(&self, cmd: HostCommand) {
        if self.tx.send(cmd).is_err() {
            warn!("host connection closed, dropping command");
        }
    }
}
