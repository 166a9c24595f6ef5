use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetwake::action::{self, PressTimings};
use fleetwake::config::{AppConfig, DEFAULT_CONFIG_TOML};
use fleetwake::pinger::{HealthPinger, SystemPing};
use fleetwake::privs::{self, PrivilegeState};
use fleetwake::security::AccessPolicy;
use fleetwake::state::AppState;
use fleetwake::supervisor::Supervisor;
use fleetwake::targets::TargetRegistry;
use fleetwake::web;
use fleetwake::wol::MagicPacketListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Remote power/reset controller for GPIO-wired compute boards
#[derive(Parser, Debug)]
#[command(name = "fleetwake", version, about)]
struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/fleetwake/fleetwake.toml")]
    config: PathBuf,

    /// Write a commented default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,

    /// Override the web interface bind address
    #[arg(short, long)]
    address: Option<String>,

    /// Override the web interface port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured log level
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Increase log verbosity (-v debug, -vv trace); wins over --log-level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fleetwake={},tower_http=warn", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    if args.write_default_config {
        if let Some(parent) = args.config.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&args.config, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Failed to write {}", args.config.display()))?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let mut config = AppConfig::load(&args.config)?;
    if let Some(address) = args.address {
        config.web.bind_address = address;
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(level) = args.log_level {
        config.general.log_level = level.as_str().to_string();
    }
    match args.verbose {
        0 => {}
        1 => config.general.log_level = "debug".to_string(),
        _ => config.general.log_level = "trace".to_string(),
    }
    config.validate()?;

    init_logging(&config.general.log_level);
    info!(
        "fleetwake {} starting (pid {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );

    let registry = Arc::new(TargetRegistry::from_config(&config)?);
    if registry.is_empty() {
        warn!("No targets configured; nothing will respond to triggers");
    }
    info!("Managing {} target(s)", registry.len());

    // GPIO lines are requested before any privilege drop
    let timings = PressTimings::from_config(&config);
    let machines = Arc::new(action::build_machines(&registry, timings));

    // Bind, then drop. A bind failure here is fatal by design.
    let privs = Arc::new(PrivilegeState::new());
    let listeners = privs::sequence(&config, &privs)?;

    let policy = Arc::new(AccessPolicy::from_config(&config.security)?);

    let pinger = if config.pinger.enabled {
        if config.pinger.hosts.is_empty() {
            warn!("Pinger enabled with no hosts, skipping");
            None
        } else {
            Some(Arc::new(HealthPinger::new(
                &config.pinger,
                Arc::new(SystemPing),
            )))
        }
    } else {
        None
    };

    let supervisor = Arc::new(Supervisor::new(config.threads.restart, privs.clone()));
    let state = AppState::new(
        config.clone(),
        registry.clone(),
        machines.clone(),
        policy.clone(),
        pinger.clone(),
        privs,
        supervisor.clone(),
    );

    if let Some(socket) = listeners.wol {
        let port = config.wol.port;
        let policy = policy.clone();
        let registry = registry.clone();
        let machines = machines.clone();
        supervisor.add_unit(
            "wol",
            Some(port),
            Box::new(move || {
                // The factory clones the pre-bound socket so a restarted
                // incarnation never has to re-bind
                let socket = socket.try_clone();
                let policy = policy.clone();
                let registry = registry.clone();
                let machines = machines.clone();
                Box::pin(async move {
                    let socket = match socket {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("Failed to clone magic packet socket: {}", e);
                            return;
                        }
                    };
                    match MagicPacketListener::from_std(socket, policy, registry, machines) {
                        Ok(listener) => listener.run().await,
                        Err(e) => warn!("Failed to start magic packet listener: {}", e),
                    }
                })
            }),
        );
    }

    if let Some(listener) = listeners.web {
        let port = config.web.port;
        let state = state.clone();
        supervisor.add_unit(
            "web",
            Some(port),
            Box::new(move || {
                let listener = listener.try_clone();
                let state = state.clone();
                Box::pin(async move {
                    let listener = match listener {
                        Ok(l) => l,
                        Err(e) => {
                            warn!("Failed to clone web listener: {}", e);
                            return;
                        }
                    };
                    if let Err(e) = web::serve(listener, state).await {
                        warn!("Web interface stopped: {}", e);
                    }
                })
            }),
        );
    }

    if let Some(pinger) = pinger {
        supervisor.add_unit(
            "pinger",
            None,
            Box::new(move || {
                let pinger = pinger.clone();
                Box::pin(pinger.run())
            }),
        );
    }

    supervisor.start();

    tokio::select! {
        _ = supervisor.clone().run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}
