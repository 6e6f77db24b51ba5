#![forbid(unsafe_code)]

mod bus;
mod constants;
mod error;
mod geometry;
mod host;
mod placement;
mod settings;
mod sidebar;
mod surface;
mod types;
mod x11_utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use bus::{BusEvent, SocketBus};
use placement::RetryPolicy;
use settings::SettingsSync;
use surface::Surface;
use types::SurfaceRole;
use x11_utils::X11Host;

#[derive(Parser, Debug)]
#[command(name = "sis-shell", version, about = "Desktop shell surfaces for X11")]
struct Cli {
    /// trace, debug, info, warn or error (default: $LOG_LEVEL, else info)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one shell surface; start one process per role
    Surface {
        #[arg(value_enum)]
        role: SurfaceRole,
    },
    /// Inspect or edit the shared settings document
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the settings every surface would apply right now
    Show,
    /// Change settings and notify running surfaces, e.g. `set theme=light appearance.dockBlur=30`
    Set {
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(String, String)>,
    },
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let level = level
        .map(str::to_string)
        .unwrap_or_else(|| std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));
    let log_level = match level.to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    // stdout belongs to `settings show`
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")?;
    Ok(())
}

fn run_surface(role: SurfaceRole) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context(format!("Failed to register handler for signal {}", signal))?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let host = Arc::new(X11Host::connect(role)?);
        let bus = SocketBus::bind(role)?;
        let sync = SettingsSync::from_default_paths();

        let (surface, events) = Surface::start(role, host, sync, &bus, RetryPolicy::default())?;
        surface.run(events, shutdown).await
    })
}

fn show_settings() -> Result<()> {
    let (snapshot, source) = SettingsSync::from_default_paths().read();
    info!(source = ?source, rev = snapshot.rev, "Read settings");
    println!("{}", snapshot.to_json()?);
    Ok(())
}

fn set_settings(assignments: &[(String, String)]) -> Result<()> {
    let mut sync = SettingsSync::from_default_paths();
    let (mut snapshot, _) = sync.read();
    let known_rev = snapshot.rev;
    for (key, value) in assignments {
        snapshot.set(key, value)?;
    }

    let saved = sync.save(snapshot, Some(known_rev))?;
    match bus::broadcast(&BusEvent::SettingsUpdated(saved.clone())) {
        Ok(delivered) => info!(rev = saved.rev, surfaces = delivered, "Broadcast settings update"),
        // Surfaces still pick the change up on their next poll
        Err(e) => warn!(error = ?e, "Failed to broadcast settings update"),
    }
    println!("{}", saved.to_json()?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Command::Surface { role } => {
            info!(role = %role, version = env!("CARGO_PKG_VERSION"), "Starting surface");
            run_surface(role)
        }
        Command::Settings { action } => match action {
            SettingsAction::Show => show_settings(),
            SettingsAction::Set { assignments } => set_settings(&assignments),
        },
    }
}
