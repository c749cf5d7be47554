//! tcsync CLI - Monitor timecode from a recorder with clock fallback.

use anyhow::Context;
use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::time::Duration;
use tcsync::{
    DeviceConfig, ManagerConfig, ManagerEvent, ProviderConfig, SignalStatus, TimecodeManager,
    TimecodeSnapshot,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Label printed when the active source has no usable timecode.
const NO_TIMECODE: &str = "--:--:--:--";

/// Command-line arguments for the tcsync tool.
#[derive(Parser, Debug)]
#[command(name = "tcsync")]
#[command(version)]
#[command(about = "Frame-accurate timecode with automatic failover to a local clock")]
#[command(long_about = "tcsync reads SMPTE timecode from a networked recorder and \n\
    falls back to a free-running local clock when the recorder goes away.\n\n\
    EXAMPLES:\n    \
    tcsync --primary-host 192.168.1.50\n    \
    tcsync --config studio.json --json\n    \
    tcsync --config studio.json --fallback-delay-ms 5000 --duration 60")]
struct Args {
    /// JSON manager configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recorder address; replaces the configured primary host
    #[arg(long, env = "TCSYNC_PRIMARY_HOST")]
    primary_host: Option<String>,

    /// Recorder control port
    #[arg(long)]
    primary_port: Option<u16>,

    /// How long the primary must be down before failing over (ms)
    #[arg(long)]
    fallback_delay_ms: Option<u64>,

    /// Maximum forwarded snapshots per second
    #[arg(long)]
    max_emit_rate: Option<f64>,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,
}

impl Args {
    /// Load the config file (or defaults) and apply flag overrides.
    fn manager_config(&self) -> anyhow::Result<ManagerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                ManagerConfig::from_json(&json)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => ManagerConfig::default(),
        };

        if let Some(host) = &self.primary_host {
            match &mut config.primary {
                ProviderConfig::Device(device) => device.host = host.clone(),
                ProviderConfig::Clock(clock) => {
                    let device = DeviceConfig::new(host.clone())
                        .with_frame_rate(clock.frame_rate, clock.drop_frame);
                    config.primary = device.into();
                }
            }
        }
        if let Some(port) = self.primary_port {
            match &mut config.primary {
                ProviderConfig::Device(device) => device.port = port,
                ProviderConfig::Clock(_) => {
                    anyhow::bail!("--primary-port needs a device primary (set --primary-host)")
                }
            }
        }
        if let Some(ms) = self.fallback_delay_ms {
            config.fallback_delay = Duration::from_millis(ms);
        }
        if let Some(hz) = self.max_emit_rate {
            config.max_emit_rate_hz = hz;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn styled_status(status: SignalStatus) -> String {
    let text = status.to_string();
    match status {
        SignalStatus::Ok => style(text).green().to_string(),
        SignalStatus::Degraded | SignalStatus::Connecting => style(text).yellow().to_string(),
        _ => style(text).red().to_string(),
    }
}

fn format_snapshot(snapshot: &TimecodeSnapshot) -> String {
    let timecode = snapshot.timecode.as_deref().unwrap_or(NO_TIMECODE);
    let mut line = format!(
        "{}  {:<15}  {}",
        style(timecode).bold(),
        snapshot.source.to_string(),
        styled_status(snapshot.status)
    );
    if let Some(error) = &snapshot.error {
        line.push_str(&format!("  ({})", error));
    }
    line
}

/// Render one event as a human-readable line.
fn format_event(event: &ManagerEvent) -> String {
    match event {
        ManagerEvent::Update(snapshot) => format_snapshot(snapshot),
        ManagerEvent::Connected => format!("{}", style("connected").cyan()),
        ManagerEvent::Disconnected => format!("{}", style("disconnected").cyan()),
        ManagerEvent::Failover { from, to, reason } => format!(
            "{} {} -> {}: {}",
            style("FAILOVER").yellow().bold(),
            from,
            to,
            reason
        ),
        ManagerEvent::Restored { provider } => {
            format!("{} {}", style("RESTORED").green().bold(), provider)
        }
        ManagerEvent::Error { message } => format!("{} {}", style("ERROR").red().bold(), message),
    }
}

fn print_event(event: &ManagerEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", format_event(event));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.manager_config()?;
    debug!(?config, "Loaded configuration");

    let manager = TimecodeManager::new(config)?;
    let mut events = manager.subscribe();
    manager
        .start()
        .await
        .context("could not start timecode acquisition")?;

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(&event, args.json)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    manager.stop().await;
    Ok(())
}
