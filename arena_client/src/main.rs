//! Bot client binary.
//!
//! Usage:
//!   cargo run -p arena_client --bin bot -- [--addr 127.0.0.1:9999] [--profile binary|json]
//!       [--ticks 600] [--interval-ms 50] [--shoot-every 10]
//!
//! The bot joins a room, circles its spawn point, fires every few commands
//! and logs what the room reports back.

use std::env;
use std::time::Duration;

use anyhow::Context;
use arena_client::GameClient;
use arena_shared::protocol::{ClientStatus, Profile, ServerMessage};
use tracing::{debug, info};

struct BotArgs {
    addr: String,
    profile: Profile,
    ticks: u32,
    interval: Duration,
    shoot_every: u32,
}

fn parse_args() -> anyhow::Result<BotArgs> {
    let mut bot = BotArgs {
        addr: "127.0.0.1:9999".to_string(),
        profile: Profile::Binary,
        ticks: 600,
        interval: Duration::from_millis(50),
        shoot_every: 10,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--addr", Some(v)) => {
                bot.addr = v.clone();
                i += 2;
            }
            ("--profile", Some(v)) => {
                bot.profile = v.parse()?;
                i += 2;
            }
            ("--ticks", Some(v)) => {
                bot.ticks = v.parse().with_context(|| format!("bad --ticks {v}"))?;
                i += 2;
            }
            ("--interval-ms", Some(v)) => {
                let ms: u64 = v.parse().with_context(|| format!("bad --interval-ms {v}"))?;
                bot.interval = Duration::from_millis(ms);
                i += 2;
            }
            ("--shoot-every", Some(v)) => {
                bot.shoot_every = v.parse().with_context(|| format!("bad --shoot-every {v}"))?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(bot)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    info!(addr = %args.addr, profile = %args.profile, "Connecting");
    let mut client = GameClient::connect(args.addr.as_str(), args.profile).await?;

    let (cx, cy) = (f64::from(client.spawn.x), f64::from(client.spawn.y));
    let mut last_status = ClientStatus::InGame;

    for n in 0..args.ticks {
        let phase = f64::from(n) * 0.05;
        let x = (cx + 40.0 * phase.cos()) as i16;
        let y = (cy + 40.0 * phase.sin()) as i16;
        let angle = (phase.to_degrees() % 360.0) as f32;

        if args.shoot_every > 0 && n % args.shoot_every == 0 {
            client.send_shoot(x, y, angle).await?;
        } else {
            client.send_move(x, y, angle).await?;
        }

        // Drain whatever arrived during this interval.
        while let Some(msg) = client.recv(args.interval).await? {
            if let ServerMessage::RoomState(snap) = msg {
                debug!(tick = snap.tick, clients = snap.clients.len(), bullets = snap.bullets.len(), "Room state");
                if let Some(me) = client.snaps.latest_client(client.client_id) {
                    if me.status != last_status {
                        info!(status = ?me.status, frags = me.frags, "Status changed");
                        last_status = me.status;
                    }
                }
                break;
            }
        }
    }

    if let Some(snap) = client.snaps.last() {
        info!(tick = snap.tick, clients = snap.clients.len(), "Done");
    }
    client.close().await;
    Ok(())
}
