//! `handover-cli` – node entry point.
//!
//! This binary:
//!
//! 1. Initialises structured logging (and OTLP export when configured).
//! 2. Loads `~/.handover/config.toml`, writing defaults on first run, and
//!    validates the channel names.
//! 3. Builds a **current-thread** Tokio runtime so the dispatch loop and the
//!    bridge share one thread, then runs the rosbridge endpoint next to the
//!    fixed-rate dispatch loop.
//! 4. Intercepts **Ctrl-C** to stop the loop cleanly.

mod config;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use handover_middleware::{EventBus, Ros2Bridge};
use handover_runtime::{DispatchLoop, init_tracing};
use handover_types::HandoverError;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let _guard = init_tracing("handover");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "could not load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cfg.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    info!(topic = %cfg.source_a_topic, msg_type = "TransformStamped", "subscribing vicon topic");
    info!(topic = %cfg.source_b_topic, msg_type = "PoseStamped", "subscribing VO topic");
    info!(topic = %cfg.publish_topic, msg_type = "PoseStamped", rate_hz = cfg.rate_hz, "publishing pose topic");
    info!(service = %cfg.toggle_service, "advertising toggle service");

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping handover node …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, shutdown)) {
        Ok(()) => {
            println!("{}", "  ✓ Handover node stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "handover node failed");
            ExitCode::FAILURE
        }
    }
}

/// Wire the bus, bridge and dispatch loop together and run until shutdown
/// or until the bridge endpoint fails.
async fn run(cfg: config::Config, shutdown: Arc<AtomicBool>) -> Result<(), HandoverError> {
    let bus = Arc::new(EventBus::default());
    let dispatch = DispatchLoop::new(Arc::clone(&bus), cfg.dispatch_config());
    let bridge = Ros2Bridge::new(Arc::clone(&bus), cfg.bridge_topics());
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.bridge_port));

    tokio::select! {
        result = dispatch.run(shutdown) => result,
        served = bridge.run_ws_server(addr) => served,
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║           handover pose node         ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!(
        "  {} {}",
        "handover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Seamless vicon / VO pose switcher");
    println!();
}
