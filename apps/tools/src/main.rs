use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use shared::domain::{MatchDocument, MatchId, MatchStatus, PlayerId};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/tictactoe.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Matches still looking for a second player, oldest first.
    Waiting {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Most recent matches in one status (waiting, active, finished).
    Matches {
        status: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Full document of one match as JSON.
    ShowMatch { match_id: i64 },
    Stats { player_id: String },
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn summary(document: &MatchDocument) -> String {
    let player = |p: &Option<PlayerId>| p.as_ref().map_or("-".to_string(), PlayerId::to_string);
    format!(
        "match {} v{} {} x={} o={} turn={} winner={}",
        document.id,
        document.version,
        document.status.as_str(),
        player(&document.player_x),
        player(&document.player_o),
        document.turn,
        document.winner.as_str()
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Waiting { limit } => {
            for document in storage.list_waiting_matches(limit).await? {
                println!("{}", summary(&document));
            }
        }
        Command::Matches { status, limit } => {
            let status = MatchStatus::parse(&status.to_ascii_lowercase())
                .ok_or_else(|| anyhow!("unknown match status '{status}'"))?;
            for document in storage.list_matches_by_status(status, limit).await? {
                println!("{}", summary(&document));
            }
        }
        Command::ShowMatch { match_id } => {
            let document = storage
                .get_match(MatchId(match_id))
                .await?
                .ok_or_else(|| anyhow!("match {match_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            println!("{}", document.board);
        }
        Command::Stats { player_id } => match storage.load_stats(&PlayerId::new(&player_id)).await? {
            Some(stats) => println!(
                "{player_id}: wins={} losses={} draws={} games={}",
                stats.wins,
                stats.losses,
                stats.draws,
                stats.games()
            ),
            None => println!("{player_id}: no finished games"),
        },
        Command::Leaderboard { limit } => {
            for (rank, entry) in storage.leaderboard(limit).await?.iter().enumerate() {
                println!(
                    "{:>3}. {} wins={} draws={} losses={}",
                    rank + 1,
                    entry.player_id,
                    entry.stats.wins,
                    entry.stats.draws,
                    entry.stats.losses
                );
            }
        }
    }

    Ok(())
}
