//! `capgate-cli` – interactive front end for the dispatch core.
//!
//! This binary:
//!
//! 1. Loads `~/.capgate/config.toml`, writing the defaults on first run, and
//!    validates it before anything is dispatched.
//! 2. Wires a file-store reactor, a router and a scheduler per the config.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/read`, `/write`, `/schedule`, `/grant`, `/help`, …).
//! 4. Intercepts **Ctrl-C** and leaves the loop cleanly.

mod config;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG sets the filter; CAPGATE_LOG_FORMAT=json switches to JSON and
    // OTEL_EXPORTER_OTLP_ENDPOINT enables span export.  User-facing output
    // still goes through println!.
    let _otel_guard = capgate_runtime::telemetry::init_tracing("capgate-cli");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            error!(error = %e, "config load failed");
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let settings = match cfg.validate() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "config rejected");
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "  Scheduling {} · composition {}",
        settings.strategy.to_string().bold(),
        settings.composition.to_string().bold()
    );
    if let Some(hours) = &settings.business_hours {
        println!("  Time window {}", format!("{hours:?}").dimmed());
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let shell = match repl::Shell::new(settings) {
        Ok(shell) => shell,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            println!("{}: {}", "Startup error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(shell, shutdown);
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

fn first_run() -> config::Config {
    println!();
    println!("  No configuration found.  Writing defaults.");

    let mut cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "capgate".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Capability-gated intent dispatch");
    println!();
}
