//! Maps a recording status onto what the key shows.

use kimai_proto::error::TrackerError;
use kimai_proto::protocol::ButtonContext;
use kimai_proto::settings::Settings;
use kimai_proto::status::RecordingStatus;

use crate::host::HostHandle;
use crate::instance::DisplayState;

pub const STOPPED_TITLE: &str = "Stopped";

const STOPPED_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="144" height="144" viewBox="0 0 144 144"><rect width="144" height="144" fill="#1f2937"/><rect x="48" y="48" width="48" height="48" rx="6" fill="#9ca3af"/></svg>"##;
const RUNNING_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="144" height="144" viewBox="0 0 144 144"><rect width="144" height="144" fill="#1f2937"/><circle cx="72" cy="72" r="28" fill="#dc2626"/></svg>"##;

/// The fixed set of key images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Stopped,
    Running,
}

impl Icon {
    pub fn data_uri(self) -> String {
        let svg = match self {
            Icon::Stopped => STOPPED_SVG,
            Icon::Running => RUNNING_SVG,
        };
        format!("data:image/svg+xml;charset=utf8,{}", svg)
    }
}

/// What the host should be told for one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Show { icon: Icon, title: String },
    Alert(TrackerError),
}

/// `HH:MM:SS`, each field at least two digits.
pub fn format_clock(elapsed_seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        elapsed_seconds / 3600,
        (elapsed_seconds / 60) % 60,
        elapsed_seconds % 60
    )
}

pub fn instruction_for(status: &RecordingStatus) -> Instruction {
    match status {
        RecordingStatus::Idle => Instruction::Show {
            icon: Icon::Stopped,
            title: STOPPED_TITLE.to_string(),
        },
        RecordingStatus::Running {
            customer_name,
            project_name,
            activity_name,
            elapsed_seconds,
        } => Instruction::Show {
            icon: Icon::Running,
            title: format!(
                "{}\n{}\n{}\n{}",
                customer_name,
                project_name,
                activity_name,
                format_clock(*elapsed_seconds)
            ),
        },
        RecordingStatus::QueryFailed { reason } => Instruction::Alert(reason.clone()),
    }
}

/// Push `status` to the key. Failures only raise the alert and leave the
/// current title and image alone.
pub fn render_status(
    host: &HostHandle,
    context: &ButtonContext,
    status: &RecordingStatus,
) -> Result<DisplayState, TrackerError> {
    match instruction_for(status) {
        Instruction::Show { icon, title } => {
            host.set_image(context, icon.data_uri());
            host.set_title(context, title);
            Ok(match icon {
                Icon::Stopped => DisplayState::Stopped,
                Icon::Running => DisplayState::Running,
            })
        }
        Instruction::Alert(reason) => {
            host.show_alert(context);
            Err(reason)
        }
    }
}

/// Title-only render of the configured display name, if any.
pub fn render_display_name(host: &HostHandle, context: &ButtonContext, settings: &Settings) {
    if let Some(name) = settings.display_name() {
        host.set_title(context, name);
    }
}
