use kimai_proto::protocol::{HostCommand, HostEvent};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::PluginEvent;

pub async fn connect(address: &str) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    info!("Connected to host at {}", address);
    Ok(stream)
}

/// Decode host frames into `PluginEvent::Host` until the stream ends, then
/// send `Shutdown`.
pub async fn read_events<R>(mut reader: R, event_tx: mpsc::Sender<PluginEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    'read: loop {
        match reader.read(&mut tmp).await {
            Ok(0) => {
                info!("Host closed connection");
                break;
            }
            Ok(n) => {
                read_buf.extend_from_slice(&tmp[..n]);

                loop {
                    match HostEvent::decode(&read_buf) {
                        Ok(Some((Ok(evt), consumed))) => {
                            read_buf.drain(..consumed);
                            debug!("host event: {:?}", evt);
                            if event_tx.send(PluginEvent::Host(evt)).await.is_err() {
                                warn!("PluginEvent channel closed");
                                return;
                            }
                        }
                        Ok(Some((Err(e), consumed))) => {
                            read_buf.drain(..consumed);
                            warn!("Skipping undecodable host frame: {}", e);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("Host stream corrupt: {}", e);
                            break 'read;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Read error from host: {}", e);
                break;
            }
        }
    }

    let _ = event_tx.send(PluginEvent::Shutdown).await;
}

/// Drain queued host commands onto the stream until every `HostHandle` is
/// dropped or a write fails.
pub async fn write_commands<W>(mut writer: W, mut command_rx: mpsc::UnboundedReceiver<HostCommand>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = command_rx.recv().await {
        let encoded = match cmd.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode {:?}: {}", cmd, e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&encoded).await {
            error!("Write to host failed: {}", e);
            break;
        }
    }
    debug!("host writer exiting");
}
