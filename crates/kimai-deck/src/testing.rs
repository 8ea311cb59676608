//! Test helpers: a host handle whose commands can be inspected.

use kimai_proto::protocol::HostCommand;
use tokio::sync::mpsc;

use crate::host::HostHandle;

pub fn host_pair() -> (HostHandle, mpsc::UnboundedReceiver<HostCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HostHandle::new(tx), rx)
}

/// Everything queued so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<HostCommand>) -> Vec<HostCommand> {
    let mut out = Vec::new();
    while let Ok(cmd) = rx.try_recv() {
        out.push(cmd);
    }
    out
}
