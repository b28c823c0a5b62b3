//! Harness for socket-level tests: a real server on an ephemeral port.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use arena_client::GameClient;
use arena_server::{server::ServerStatus, GameServer, ServerHandle};
use arena_shared::{config::ServerConfig, protocol::Profile};
use tokio::{task::JoinHandle, time::Instant};

/// Generous bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Loopback config with a fast tick and two seats per room.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        tick_hz: 20,
        room_capacity: 2,
        ..ServerConfig::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    pub profile: Profile,
    task: JoinHandle<()>,
}

/// Binds and starts a server in the background.
pub async fn spawn_server(cfg: ServerConfig) -> anyhow::Result<TestServer> {
    init_tracing();
    let profile = cfg.profile;
    let server = GameServer::bind(cfg).await.context("bind test server")?;
    let addr = server.local_addr()?;
    let handle = server.handle();
    let task = tokio::spawn(server.run());
    Ok(TestServer {
        addr,
        handle,
        profile,
        task,
    })
}

impl TestServer {
    /// Joins with the server's configured profile.
    pub async fn connect(&self) -> anyhow::Result<GameClient> {
        GameClient::connect(self.addr, self.profile).await
    }

    /// Polls the registry until `pred` holds. Returns the matching status.
    pub async fn wait_status<F>(&self, pred: F) -> anyhow::Result<ServerStatus>
    where
        F: Fn(&ServerStatus) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        loop {
            let status = self.handle.status().await.context("server stopped")?;
            if pred(&status) {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                anyhow::bail!("status never matched, last: {status:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Signals shutdown and waits for the server task to finish.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.handle.shutdown();
        tokio::time::timeout(WAIT, self.task)
            .await
            .context("server did not stop")?
            .context("server task")?;
        Ok(())
    }
}
