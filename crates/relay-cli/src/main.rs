//! `relay` – connection & protocol relay.
//!
//! 1. Loads `~/.relay/config.toml`, writing the defaults on first run.
//! 2. Builds the profile registry, relay hub and connection manager (backed
//!    by the simulated drivers), then starts the OSC bridge and the
//!    WebSocket event feed.
//! 3. Drops the user into an interactive shell driving the command API.
//! 4. On `/quit` or Ctrl-C closes every transport before exiting.

mod config;
mod engine;
mod shell;
mod telemetry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use tracing::{error, warn};

use crate::engine::Engine;

fn main() {
    let _guard = telemetry::init_tracing("relay");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    let engine = match runtime.block_on(Engine::start(&cfg)) {
        Ok(engine) => engine,
        Err(e) => {
            println!("{}: {}", "Startup failed".red(), e);
            std::process::exit(1);
        }
    };
    print_endpoints(&cfg, &engine);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing connections …".yellow().bold());
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    shell::run(engine.manager.clone(), runtime.handle().clone(), shutdown);

    runtime.block_on(engine.shutdown());
    println!("{}", "  ✓ All transports closed.".green());
}

fn print_endpoints(cfg: &config::Config, engine: &Engine) {
    if let Some(addr) = engine.ws_addr {
        println!("  WebSocket feed   {}", format!("ws://{addr}").bold());
    }
    if cfg.osc.enabled {
        println!(
            "  OSC out          {}:{} ({:?}, base {})",
            cfg.osc.target_host.bold(),
            cfg.osc.target_port,
            cfg.osc.mode,
            cfg.osc.base_address
        );
    }
    if let Some(addr) = engine.osc_listen_addr {
        println!("  OSC in           {} {}", addr.to_string().bold(), "/send [id, message]".dimmed());
    }
    println!(
        "  Drivers          {}",
        "simulated (loopback serial, scripted BLE peripherals)".dimmed()
    );
}

fn print_banner() {
    println!();
    println!("{}", r#"    ____       __           "#.bold().cyan());
    println!("{}", r#"   / __ \___  / /___ ___  __"#.bold().cyan());
    println!("{}", r#"  / /_/ / _ \/ / __ `/ / / /"#.bold().cyan());
    println!("{}", r#" / _, _/  __/ / /_/ / /_/ / "#.bold().cyan());
    println!("{}", r#"/_/ |_|\___/_/\__,_/\__, /  "#.bold().cyan());
    println!("{}", r#"                   /____/   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Relay".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Serial & BLE device relay with OSC and WebSocket output");
    println!();
}
