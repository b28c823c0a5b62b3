//! Operator console: line parsing and the loop that acts on it.
//!
//! The binary feeds stdin lines into a channel; [`run_console`] consumes
//! them against a running server.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::{ServerHandle, ServerStatus};

/// One parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Graceful shutdown.
    Exit,
    /// Print the room registry.
    Status { json: bool },
}

impl OperatorCommand {
    /// Parses a console line. Unknown input yields `None` and is ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let cmd = words.next()?.to_ascii_lowercase();
        match cmd.as_str() {
            "exit" | "quit" => Some(OperatorCommand::Exit),
            "status" => Some(OperatorCommand::Status {
                json: words.next().is_some_and(|w| w.eq_ignore_ascii_case("json")),
            }),
            _ => None,
        }
    }
}

/// Why [`run_console`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator asked for shutdown and it was signalled.
    Shutdown,
    /// The input channel closed. The server keeps running.
    InputClosed,
    /// The server stopped answering status requests.
    ServerGone,
}

/// Formats the room registry for the operator.
pub fn render_status(status: &ServerStatus, json: bool) -> Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string(status);
    }
    let mut out = format!("rooms: {}  clients: {}", status.rooms.len(), status.members());
    for room in &status.rooms {
        out.push_str(&format!("\n  room {:>4}  {}/{}", room.id.0, room.members, room.capacity));
    }
    Ok(out)
}

/// Applies console lines to the server until exit, input close or server stop.
pub async fn run_console(handle: ServerHandle, mut lines: mpsc::Receiver<String>) -> ConsoleExit {
    while let Some(line) = lines.recv().await {
        match OperatorCommand::parse(&line) {
            Some(OperatorCommand::Exit) => {
                info!("Shutdown requested from console");
                handle.shutdown();
                return ConsoleExit::Shutdown;
            }
            Some(OperatorCommand::Status { json }) => match handle.status().await {
                Some(status) => match render_status(&status, json) {
                    Ok(text) => println!("{text}"),
                    Err(e) => warn!(error = %e, "Status encode failed"),
                },
                None => return ConsoleExit::ServerGone,
            },
            None => debug!(%line, "Ignored console input"),
        }
    }
    ConsoleExit::InputClosed
}
