//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server --bin server -- [--config server.json] [--addr 0.0.0.0:9999]
//!       [--tick-hz 30] [--capacity 8] [--profile binary|json]
//!
//! Flags override values from the config file.
//!
//! Console commands:
//!   status [json]  - Show rooms and occupancy
//!   exit | quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context};
use arena_server::{
    console::{run_console, ConsoleExit},
    GameServer,
};
use arena_shared::{config::ServerConfig, protocol::Profile};
use tokio::sync::mpsc;
use tracing::{debug, info};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let Some(path) = args.get(i + 1) else {
                bail!("--config needs a path");
            };
            ServerConfig::load(Path::new(path)).with_context(|| format!("load config {path}"))?
        }
        None => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(_)) => i += 2,
            ("--addr", Some(v)) => {
                cfg.listen_addr = v.clone();
                i += 2;
            }
            ("--tick-hz", Some(v)) => {
                cfg.tick_hz = v.parse().with_context(|| format!("bad --tick-hz {v}"))?;
                i += 2;
            }
            ("--capacity", Some(v)) => {
                cfg.room_capacity = v.parse().with_context(|| format!("bad --capacity {v}"))?;
                i += 2;
            }
            ("--profile", Some(v)) => {
                cfg.profile = v.parse::<Profile>()?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.listen_addr,
        tick_hz = cfg.tick_hz,
        capacity = cfg.room_capacity,
        profile = %cfg.profile,
        "Starting server"
    );

    let server = GameServer::bind(cfg).await.context("bind listener")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");
    let handle = server.handle();

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for rooms, 'exit' to quit.");
    println!();

    let mut server_task = tokio::spawn(server.run());
    // Stdin closing does not stop the server.
    let console_handle = handle.clone();
    tokio::spawn(async move {
        let exit = run_console(console_handle, console_rx).await;
        if exit != ConsoleExit::Shutdown {
            debug!(?exit, "Console stopped");
        }
    });

    tokio::select! {
        res = &mut server_task => {
            res.context("server task")?;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            handle.shutdown();
        }
    }

    server_task.await.context("server task")?;
    Ok(())
}
