//! Operator console against a live server.

use arena_server::console::{run_console, ConsoleExit};
use arena_tests::{spawn_server, test_config, WAIT};
use tokio::sync::mpsc;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exit_line_shuts_the_server_down() -> anyhow::Result<()> {
    let server = spawn_server(test_config()).await?;
    let _a = server.connect().await?;
    server.wait_status(|s| s.members() == 1).await?;

    let (tx, rx) = mpsc::channel(8);
    let console = tokio::spawn(run_console(server.handle.clone(), rx));
    for line in ["status", "status json", "bogus", "exit", "status"] {
        tx.send(line.to_string()).await?;
    }
    let exit = tokio::time::timeout(WAIT, console).await??;
    assert_eq!(exit, ConsoleExit::Shutdown);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_input_leaves_server_running() -> anyhow::Result<()> {
    let server = spawn_server(test_config()).await?;

    let (tx, rx) = mpsc::channel(8);
    tx.send("status".to_string()).await?;
    drop(tx);
    let exit = tokio::time::timeout(WAIT, run_console(server.handle.clone(), rx)).await?;
    assert_eq!(exit, ConsoleExit::InputClosed);

    // Still answering.
    let _a = server.connect().await?;
    server.wait_status(|s| s.members() == 1).await?;

    server.stop().await
}
