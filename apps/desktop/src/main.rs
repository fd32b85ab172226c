use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use client_core::{
    ClientConfig, HttpStore, InMemoryStore, LocalTimings, MatchStore, Mode, RetryPolicy, Session,
    StatsStore,
};
use shared::domain::PlayerId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod terminal;

use terminal::{help_text, parse_command, Command, TerminalBell, TerminalView};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StartMode {
    Ai,
    Online,
}

#[derive(Parser, Debug)]
struct Args {
    /// Match store server, e.g. http://127.0.0.1:8443. Without it online
    /// matches only pair sessions inside this process.
    #[arg(long)]
    server_url: Option<String>,
    /// Player identity; a random one is generated when omitted.
    #[arg(long)]
    player_id: Option<String>,
    /// Number cells 1-9 instead of 0-8.
    #[arg(long)]
    one_based: bool,
    #[arg(long)]
    mode: Option<StartMode>,
    #[arg(long, default_value_t = 400)]
    ai_delay_ms: u64,
    #[arg(long, default_value_t = 3000)]
    restart_delay_ms: u64,
    #[arg(long, default_value_t = 4)]
    retry_attempts: u32,
    #[arg(long)]
    ai_seed: Option<u64>,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            local: LocalTimings {
                ai_delay: Duration::from_millis(self.ai_delay_ms),
                restart_delay: Duration::from_millis(self.restart_delay_ms),
            },
            retry: RetryPolicy {
                attempts: self.retry_attempts.max(1),
                ..RetryPolicy::default()
            },
            ai_seed: self.ai_seed,
            ..ClientConfig::default()
        }
    }
}

type Stores = (Arc<dyn MatchStore>, Arc<dyn StatsStore>);

fn open_stores(server_url: Option<&str>) -> Result<Stores> {
    match server_url {
        Some(url) => {
            let store = HttpStore::new(url).with_context(|| format!("invalid server url {url}"))?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => {
            let store = InMemoryStore::new();
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let player_id = args
        .player_id
        .clone()
        .map(PlayerId::new)
        .unwrap_or_else(PlayerId::random);
    let (matches, stats) = open_stores(args.server_url.as_deref())?;
    info!(player_id = %player_id, server_url = ?args.server_url, "starting tic-tac-toe");

    let view = TerminalView::new(TerminalBell, args.one_based);
    let mut session = Session::new(player_id, args.client_config(), matches, stats, view);
    println!("{}", help_text(args.one_based));

    match args.mode {
        Some(StartMode::Ai) => {
            let _ = session.select_mode(Mode::Ai).await;
        }
        Some(StartMode::Online) => {
            let _ = session.select_mode(Mode::Online).await;
        }
        None => {}
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line, args.one_based) {
                    Some(Command::Quit) => break,
                    Some(command) => run_command(&mut session, command, args.one_based).await,
                    None => println!("unknown command: {}", line.trim()),
                }
            }
            _ = session.next_event() => {}
        }
    }

    info!("bye");
    Ok(())
}

async fn run_command(session: &mut Session<TerminalView>, command: Command, one_based: bool) {
    // Failures are already shown as status notices by the session.
    let _ = match command {
        Command::Cell(index) => session.select_cell(index).await,
        Command::Ai => session.select_mode(Mode::Ai).await,
        Command::Online => session.select_mode(Mode::Online).await,
        Command::Restart => session.restart().await,
        Command::Sound => {
            let on = session.toggle_sound();
            println!("sound {}", if on { "on" } else { "off" });
            Ok(())
        }
        Command::Stats => {
            match session.stats().await {
                Ok(Some(stats)) => println!(
                    "wins {} / losses {} / draws {}",
                    stats.wins, stats.losses, stats.draws
                ),
                Ok(None) => println!("no finished online games yet"),
                Err(err) => println!("stats unavailable: {err}"),
            }
            Ok(())
        }
        Command::Help => {
            println!("{}", help_text(one_based));
            Ok(())
        }
        Command::Quit => Ok(()),
    };
}
