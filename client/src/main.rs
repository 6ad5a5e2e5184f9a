use clap::Parser;
use client::config::{session_url, Bootstrap, PlayerInfo, SessionConfig};
use client::network::{Client, ClientEvent, ClientHandle, Command};
use client::transport::WsTransport;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::Vec2;
use std::f64::consts::TAU;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless arena client", long_about = None)]
struct Args {
    /// Server base URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Player id; a random one is picked when omitted
    #[arg(short = 'p', long)]
    player_id: Option<String>,

    /// Room to join
    #[arg(short = 'r', long, default_value = "lobby")]
    room_id: String,

    #[arg(long, default_value = "400")]
    spawn_x: f64,

    #[arg(long, default_value = "300")]
    spawn_y: f64,

    #[arg(short = 'u', long, default_value = "bot")]
    username: String,

    #[arg(long, default_value = "0")]
    avatar: u32,

    /// Reconnect after the grace period following an unexpected disconnect
    #[arg(long)]
    auto_reconnect: bool,

    /// Milliseconds between random changes of direction
    #[arg(long, default_value = "1500")]
    wander_ms: u64,

    /// Milliseconds between melee attacks
    #[arg(long, default_value = "2000")]
    attack_ms: u64,

    /// Position updates per second
    #[arg(long)]
    update_rate: Option<f64>,

    /// Position pulses per second
    #[arg(long)]
    pulse_rate: Option<f64>,

    /// Milliseconds between latency probes
    #[arg(long)]
    ping_period_ms: Option<u64>,

    /// Unanswered probes tolerated before disconnecting
    #[arg(long)]
    drop_threshold: Option<usize>,

    /// Milliseconds to wait after an unexpected disconnect
    #[arg(long)]
    reconnect_grace_ms: Option<u64>,
}

impl Args {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(rate) = self.update_rate.filter(|r| *r > 0.0) {
            config.position_update_interval = Duration::from_secs_f64(1.0 / rate);
        }
        if let Some(rate) = self.pulse_rate.filter(|r| *r > 0.0) {
            config.pulse_interval = Duration::from_secs_f64(1.0 / rate);
        }
        if let Some(ms) = self.ping_period_ms {
            config.ping_period = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.drop_threshold {
            config.drop_threshold = threshold;
        }
        if let Some(ms) = self.reconnect_grace_ms {
            config.reconnect_grace = Duration::from_millis(ms);
        }
        config
    }
}

fn handle_event(event: ClientEvent, handle: &ClientHandle, auto_reconnect: bool) {
    match event {
        ClientEvent::Lifecycle { from, to, reason } => match reason {
            Some(reason) => info!("Connection {:?} -> {:?} ({:?})", from, to, reason),
            None => info!("Connection {:?} -> {:?}", from, to),
        },
        ClientEvent::Chat {
            owner_id,
            message,
            known,
        } => {
            if known {
                info!("[chat] {}: {}", owner_id, message);
            } else {
                info!("[chat] {} (not in room): {}", owner_id, message);
            }
        }
        ClientEvent::CombatHit(hit) => info!(
            "{} hit {} with strength {:.2}",
            hit.attacker_id, hit.victim_id, hit.strength
        ),
        ClientEvent::Latency(rtt) => debug!("Latency {} ms", rtt.as_millis()),
        ClientEvent::TransportError(error) => warn!("Transport error: {}", error),
        ClientEvent::RosterChanged { spawned, removed } => {
            for id in spawned {
                info!("{} entered the room", id);
            }
            for id in removed {
                info!("{} left the room", id);
            }
        }
        ClientEvent::MetadataNeeded(ids) => {
            // No account service here; name players after their ids.
            for id in ids {
                let info = PlayerInfo {
                    username: id.clone(),
                    avatar: 0,
                };
                handle.send(Command::SetPlayerInfo { id, info });
            }
        }
        ClientEvent::LocalPlayerDied => warn!("We died"),
        ClientEvent::ReconnectGraceElapsed => {
            if auto_reconnect {
                info!("Reconnecting...");
                handle.send(Command::Connect);
            } else {
                info!("Disconnected; run with --auto-reconnect to retry");
            }
        }
        ClientEvent::DataRate(rate) => info!(
            "Data rate: {:.1} B/s up, {:.1} B/s down",
            rate.sent_per_second, rate.received_per_second
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut rng = StdRng::from_entropy();

    let player_id = args
        .player_id
        .clone()
        .unwrap_or_else(|| format!("bot-{:04}", rng.gen_range(0..10_000)));
    let bootstrap = Bootstrap {
        player_id,
        room_id: args.room_id.clone(),
        spawn: Vec2::new(args.spawn_x, args.spawn_y),
        info: PlayerInfo {
            username: args.username.clone(),
            avatar: args.avatar,
        },
    };

    let url = session_url(&args.server, &bootstrap.player_id);
    info!("Starting client {}...", bootstrap.player_id);
    info!("Connecting to: {}", url);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = WsTransport::new(url, events_tx);
    let (client, mut handle) = Client::new(args.config(), bootstrap, transport, events_rx)?;
    let driver = tokio::spawn(client.run());

    handle.send(Command::Connect);

    let mut wander = interval(Duration::from_millis(args.wander_ms.max(1)));
    let mut attack = interval(Duration::from_millis(args.attack_ms.max(1)));
    let mut stats = interval(Duration::from_secs(5));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => handle_event(event, &handle, args.auto_reconnect),
                None => break,
            },

            _ = wander.tick() => {
                let trajectory = if rng.gen_bool(0.2) {
                    Vec2::ZERO
                } else {
                    let angle = rng.gen_range(0.0..TAU);
                    Vec2::new(angle.cos(), angle.sin())
                };
                handle.send(Command::Move { trajectory });
            },

            _ = attack.tick() => {
                handle.send(Command::Attack);
            },

            _ = stats.tick() => {
                handle.send(Command::ReportDataRate);
            },

            _ = &mut shutdown => {
                info!("Interrupted");
                handle.send(Command::Shutdown);
                break;
            },
        }
    }

    driver.await?;
    Ok(())
}
