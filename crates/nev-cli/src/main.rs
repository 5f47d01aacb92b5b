//! `nev-server` – NEV teleoperation bridge.
//!
//! 1. Loads `config.toml` (or `--config <FILE>`), falling back to defaults
//!    when the file is absent, then applies `NEV_*` overrides.
//! 2. Opens the Zenoh session, wires both links, the camera relay, the
//!    control loop and the cockpit.
//! 3. On **Ctrl-C** stops the station link, then the vehicle link, closes
//!    the Zenoh session and the viewer sessions, and lets the control loop
//!    wind down.

mod config;
mod video;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use nev_cockpit::CockpitServer;
use nev_middleware::{MessageBus, StationLink, VehicleLink, ZenohBus, command_channel};
use nev_runtime::{ControlLoop, init_tracing};

use crate::config::ServerConfig;
use crate::video::VideoPipeline;

#[derive(Debug, Parser)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "NEV teleoperation bridge server")]
struct Cli {
    /// Path to the configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE", default_value = config::DEFAULT_PATH)]
    config: PathBuf,
    /// Cockpit HTTP/WebSocket port (overrides the config file)
    #[arg(long = "web-port", short = 'p')]
    web_port: Option<u16>,
    /// Zenoh router locator, e.g. tcp/192.168.0.10:7447 (overrides the config file)
    #[arg(long = "zenoh-locator", short = 'z', value_name = "LOCATOR")]
    zenoh_locator: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    // Before the runtime exists: the OTLP exporter is synchronous.
    let _tracing = init_tracing("nev-server");
    print_banner();

    let mut cfg = match config::load_from(&cli.config) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", cli.config.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            println!(
                "  {} not found; using defaults.",
                cli.config.display().to_string().dimmed()
            );
            ServerConfig::default()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            ServerConfig::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    if let Some(port) = cli.web_port {
        cfg.web_port = port;
    }
    if let Some(locator) = cli.zenoh_locator {
        let locator = locator.trim();
        cfg.zenoh_locator = (!locator.is_empty()).then(|| locator.to_string());
    }
    info!(?cfg, "configuration resolved");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("nev-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the Tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(cfg)) {
        error!(error = %e, "server stopped with an error");
        std::process::exit(1);
    }
}

async fn serve(cfg: ServerConfig) -> Result<(), nev_types::NevError> {
    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process externally");
    }

    // ── Bus, camera relay and links ───────────────────────────────────────
    let bus: Arc<dyn MessageBus> = Arc::new(ZenohBus::open(cfg.zenoh_locator.as_deref()).await?);
    let (handoff, commands) = command_channel();

    let video = if cfg.video.enabled {
        match video::codecs().and_then(|(decoder, encoders)| {
            VideoPipeline::start(&cfg.video, decoder, encoders)
        }) {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                warn!(error = %e, "camera relay disabled");
                None
            }
        }
    } else {
        None
    };

    let vehicle = Arc::new(VehicleLink::new(bus.clone()));
    vehicle.start(handoff.clone(), video.as_ref().map(VideoPipeline::camera))?;
    let station = StationLink::new(bus.clone(), Arc::clone(&vehicle));
    station.start(handoff.clone())?;

    // ── Control loop ──────────────────────────────────────────────────────
    let control = ControlLoop::new(&cfg.bridge, Arc::clone(&vehicle), commands, Instant::now());
    let (stop_loop, loop_stopped) = watch::channel(false);
    let control_task = tokio::spawn(control.run(loop_stopped));

    // ── Cockpit ───────────────────────────────────────────────────────────
    let mut cockpit = CockpitServer::new(handoff)
        .with_port(cfg.web_port)
        .with_subscriber_capacity(cfg.subscriber_capacity);
    if let Some(pipeline) = &video {
        cockpit = cockpit.with_sessions(pipeline.sessions());
    }
    println!(
        "  Cockpit on {}\n",
        format!("http://localhost:{}", cfg.web_port).bold().cyan()
    );

    let served = tokio::select! {
        result = cockpit.run() => result,
        _ = shutdown_rx.wait_for(|stop| *stop) => Ok(()),
    };

    // ── Teardown ──────────────────────────────────────────────────────────
    station.stop();
    vehicle.stop();
    bus.close();
    if let Some(pipeline) = video {
        pipeline.stop().await;
    }
    let _ = stop_loop.send(true);
    if let Err(e) = control_task.await {
        warn!(error = %e, "control loop task ended abnormally");
    }
    println!("{}", "  ✓ Shutdown complete.".green());
    info!("shutdown complete");
    served
}

fn print_banner() {
    println!();
    println!("{}", r#"  _   _ _______     __"#.bold().cyan());
    println!("{}", r#" | \ | | ____\ \   / /"#.bold().cyan());
    println!("{}", r#" |  \| |  _|  \ \ / / "#.bold().cyan());
    println!("{}", r#" | |\  | |___  \ V /  "#.bold().cyan());
    println!("{}", r#" |_| \_|_____|  \_/   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "NEV Remote Server".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}
