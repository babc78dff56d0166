//! Rapid Texter LAN - headless peer
//!
//! Hosts, joins or scans for LAN rooms from the terminal. A bot types the
//! race text at a fixed speed so rooms can be exercised without the game.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rapidtexter::networking::sync::CHARS_PER_WORD;
use rapidtexter::networking::{interfaces, Command, LanHandle, LanNode, NetEvent, DEFAULT_TCP_PORT};
use rapidtexter::storage::config::{self, AppConfig};
use rapidtexter::{RacePhase, WordBank};

#[derive(Parser)]
#[command(name = "rapidtexter")]
#[command(about = "Rapid Texter LAN multiplayer peer")]
struct Args {
    /// Player name (defaults to the configured one)
    #[arg(short, long)]
    name: Option<String>,

    /// Race text language: en, id or prog
    #[arg(short, long)]
    language: Option<String>,

    /// TCP port to listen on (0 picks a free one)
    #[arg(long)]
    listen_port: Option<u16>,

    /// Configuration file (defaults to the platform data directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Typing speed of the bot
    #[arg(long, default_value_t = 60)]
    wpm: u32,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Create a room and start racing once enough players joined
    Host {
        #[arg(long, default_value_t = 2)]
        min_players: usize,

        /// Races to run before closing the room
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },
    /// Join the room hosted at an address
    Join {
        ip: String,

        #[arg(short, long, default_value_t = DEFAULT_TCP_PORT)]
        port: u16,
    },
    /// Listen for room announcements
    Scan {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// List usable network interfaces
    Interfaces,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    let (mut app_config, config_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&app_config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rapid Texter LAN v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = config_error {
        tracing::warn!("Using default configuration: {}", e);
    }

    if let Some(port) = args.listen_port {
        app_config.network.tcp_port = port;
    }
    let name = args.name.clone().unwrap_or(app_config.player.name.clone());
    let language = args
        .language
        .clone()
        .unwrap_or(app_config.player.language.clone());

    if let Mode::Interfaces = args.mode {
        list_interfaces();
        return Ok(());
    }

    let handle = LanNode::start(
        app_config.network.clone(),
        name,
        language,
        Box::new(WordBank::new()),
    )
    .await
    .context("starting network node")?;

    let outcome = match args.mode {
        Mode::Host { min_players, rounds } => host(&handle, min_players, rounds, args.wpm).await,
        Mode::Join { ip, port } => join(&handle, ip, port, args.wpm).await,
        Mode::Scan { seconds } => scan(&handle, seconds).await,
        Mode::Interfaces => Ok(()),
    };

    handle.shutdown().await;
    outcome
}

fn list_interfaces() {
    let candidates = interfaces::candidates();
    if candidates.is_empty() {
        println!("No usable IPv4 interfaces");
        return;
    }
    for iface in &candidates {
        println!("{:<12} {}", iface.name, iface.label());
    }
    println!("Preferred: {}", interfaces::preferred_local_ip(&candidates));
}

async fn scan(handle: &LanHandle, seconds: u64) -> Result<()> {
    let mut events = handle.subscribe();
    handle.command(Command::StartScanning)?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(NetEvent::RoomFound(room)) => println!(
                    "{} at {}:{} ({}/{} players, {:?})",
                    room.host_name, room.host_ip, room.port,
                    room.player_count, room.max_players, room.status
                ),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    let rooms = handle.snapshot().await?.rooms;
    println!("{} room(s) found", rooms.len());
    Ok(())
}

async fn host(handle: &LanHandle, min_players: usize, rounds: u32, wpm: u32) -> Result<()> {
    let mut events = handle.subscribe();
    handle.command(Command::CreateRoom)?;
    println!("Hosting on port {}", handle.listen_addr().port());

    let mut races = 0;
    let mut typist: Option<tokio::task::JoinHandle<()>> = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} events", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            NetEvent::PlayersChanged(players) => {
                let snapshot = handle.snapshot().await?;
                if players_missing(players.len(), min_players) == 0
                    && snapshot.phase == RacePhase::Lobby
                {
                    handle.command(Command::StartCountdown)?;
                }
            }
            NetEvent::PlayerJoined { name, .. } => println!("{} joined", name),
            NetEvent::PlayerLeft { name, .. } => println!("{} left", name),
            NetEvent::RaceStarted => typist = Some(start_typing(handle, wpm).await?),
            NetEvent::RaceFinished { rankings } => {
                if let Some(task) = typist.take() {
                    task.abort();
                }
                print_rankings(&rankings);
                races += 1;
                if races >= rounds {
                    break;
                }
                handle.command(Command::SendPlayAgainInvite)?;
                let players = handle.snapshot().await?.players.len();
                match players_missing(players, min_players) {
                    0 => handle.command(Command::StartCountdown)?,
                    missing => println!("Waiting for {} more player(s)", missing),
                }
            }
            _ => {}
        }
    }
    Ok(())
}

async fn join(handle: &LanHandle, ip: String, port: u16, wpm: u32) -> Result<()> {
    let mut events = handle.subscribe();
    handle.command(Command::JoinRoom { ip, port })?;

    let mut typist: Option<tokio::task::JoinHandle<()>> = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} events", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            NetEvent::JoinFailed(reason) => bail!("join failed: {}", reason),
            NetEvent::JoinSucceeded => println!("Joined the room"),
            NetEvent::CountdownStarted { seconds } => println!("Race starts in {}s", seconds),
            NetEvent::RaceStarted => typist = Some(start_typing(handle, wpm).await?),
            NetEvent::RaceFinished { rankings } => {
                if let Some(task) = typist.take() {
                    task.abort();
                }
                print_rankings(&rankings);
            }
            NetEvent::PlayAgainInviteReceived => handle.command(Command::AcceptPlayAgain)?,
            NetEvent::Kicked => bail!("kicked by the host"),
            NetEvent::ConnectionError(reason) => bail!("{}", reason),
            _ => {}
        }
    }
    Ok(())
}

/// Types the current race text at `wpm` on a background task.
async fn start_typing(handle: &LanHandle, wpm: u32) -> Result<tokio::task::JoinHandle<()>> {
    let text = handle.snapshot().await?.game_text;
    let total = text.chars().count() as u32;
    let chars_per_tick = (f64::from(wpm.max(1)) * CHARS_PER_WORD / 60.0 / 10.0).max(0.1);
    let handle = handle.clone();

    Ok(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        let mut typed = 0.0;
        loop {
            interval.tick().await;
            typed += chars_per_tick;
            let position = (typed as u32).min(total);
            let sent = if position >= total {
                handle.command(Command::FinishRace {
                    wpm,
                    accuracy: 100.0,
                    errors: 0,
                })
            } else {
                handle.command(Command::UpdateProgress {
                    position,
                    total,
                    wpm,
                })
            };
            if sent.is_err() || position >= total {
                break;
            }
        }
    }))
}

/// Players still needed before the host starts a race.
fn players_missing(players: usize, min_players: usize) -> usize {
    min_players.saturating_sub(players)
}

fn print_rankings(rankings: &[rapidtexter::networking::Ranking]) {
    println!("Results:");
    for ranking in rankings {
        println!(
            "  {}. {:<16} {:>4} wpm {:>5.1}%",
            ranking.position, ranking.name, ranking.wpm, ranking.accuracy
        );
    }
}
