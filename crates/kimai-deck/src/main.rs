mod connection;
mod core;
mod engine;
mod gesture;
mod host;
mod instance;
mod render;
#[cfg(test)]
mod testing;

use anyhow::Context;
use clap::Parser;
use kimai_proto::client::KimaiClient;
use kimai_proto::config::Config;
use tokio::sync::mpsc;

/// Keypad plugin that mirrors and toggles Kimai time recording.
///
/// The host launches the plugin with the port to connect back on and the
/// identity to register under.
#[derive(Debug, Parser)]
#[command(name = "kimai-deck", version)]
struct Args {
    /// Host bridge port; overrides the port in config.toml.
    #[arg(long)]
    port: Option<u16>,
    /// Identifier the host assigned to this plugin instance.
    #[arg(long, default_value = "kimai-deck")]
    plugin_uuid: String,
    /// Event name the host expects for registration.
    #[arg(long, default_value = "registerPlugin")]
    register_event: String,
    /// Host environment description (JSON), logged for diagnostics.
    #[arg(long)]
    info: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = kimai_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = kimai_proto::platform::log_path();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,kimai_deck=debug,hyper_util=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // The host swallows plugin output, so point the operator at the log file.
    eprintln!("kimai-deck log: {}", log_path.display());

    tracing::info!("kimai-deck starting…");
    if let Some(info) = &args.info {
        tracing::debug!("host info: {}", info);
    }

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match Config::load() {
        Ok(config) => {
            tracing::info!("Config loaded from: {:?}", Config::config_path());
            config
        }
        Err(e) => {
            tracing::warn!("Config unreadable ({}), using defaults", e);
            Config::default()
        }
    };

    // ── Host connection ──────────────────────────────────────────────────────
    let address = config.host.address_with_port(args.port);
    let stream = connection::connect(&address)
        .await
        .with_context(|| format!("failed to connect to host at {}", address))?;
    let (read_half, write_half) = stream.into_split();

    // ── HostCommand channel (core/engine → host) ─────────────────────────────
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let host = host::HostHandle::new(command_tx);
    host.register(&args.register_event, &args.plugin_uuid);
    tokio::spawn(connection::write_commands(write_half, command_rx));

    // ── PluginEvent channel (host/timers/tasks → core) ───────────────────────
    let (event_tx, event_rx) = mpsc::channel::<core::PluginEvent>(256);
    tokio::spawn(connection::read_events(read_half, event_tx.clone()));

    // ── Build and run PluginCore ─────────────────────────────────────────────
    let client = KimaiClient::new(config.rpc.timeout())?;
    let reconciler = engine::Reconciler::new(client, host.clone());
    let plugin_core = core::PluginCore::new(&config, reconciler, host, event_tx);
    plugin_core.run(event_rx).await?;

    tracing::info!("kimai-deck exiting");
    Ok(())
}
