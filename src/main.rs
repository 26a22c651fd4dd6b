//! Command line interface for playing chess over a decentralized event log.
//! Supports store initialization, key generation, ingesting events, creating
//! games, publishing moves, and resolving or following a game's current head.

mod codec;
mod config;
mod error;
mod event;
mod filter;
mod game;
mod identity;
mod publish;
mod resolver;
mod store;

use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};

use shakmaty::Position;

use config::Settings;
use game::GameStart;
use identity::Identity;
use resolver::HeadResolver;
use store::Store;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "chesstr",
    author,
    version,
    about = "Chess over signed Nostr event chains"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the event store at `STORE_ROOT`.
    Init,
    /// Generate a player identity and persist it as `SECRET_KEY`.
    Keygen,
    /// Ingest one or more event files received out of band.
    Ingest {
        /// Paths to JSON event files to ingest.
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Rebuild the reference indexes from existing events.
    Reindex,
    /// Verify a random sample of stored events.
    Verify {
        #[arg(long, default_value_t = 1000)]
        sample: usize,
    },
    /// Publish a game-start event and print the new game id.
    NewGame,
    /// Publish a move extending the current head of a game.
    Move { game_id: String, san: String },
    /// Resolve and print the current head of a game.
    Show { game_id: String },
    /// Follow a game, printing the head whenever it changes.
    Watch { game_id: String },
    /// List all game roots observed in the store.
    Games,
    /// Print the subscription filter for one game, or the merged
    /// subscription covering every observed game.
    Filter { game_id: Option<String> },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let store = Store::new(cfg.store_root.clone(), cfg.verify_sig);
    match cli.command {
        Commands::Init => {
            store.init()?;
        }
        Commands::Keygen => {
            if cfg.secret_key.is_some() {
                bail!("SECRET_KEY already configured in {}", cli.env);
            }
            let identity = Identity::generate();
            write_env_var(&cli.env, "SECRET_KEY", &identity.secret_hex())?;
            println!("{}", identity.pubkey());
        }
        Commands::Ingest { files } => {
            for f in files {
                let data = fs::read_to_string(&f)?;
                let ev: event::Event = serde_json::from_str(&data)?;
                store.ingest(&ev)?;
            }
        }
        Commands::Reindex => {
            store.reindex()?;
        }
        Commands::Verify { sample } => {
            let n = store.verify_sample(sample)?;
            println!("verified {n} events");
        }
        Commands::NewGame => {
            store.init()?;
            let identity = cfg.identity()?;
            if let Some(root) = publish::publish_game_start(&store, identity.as_ref())? {
                println!("{}", root.game_id());
            }
        }
        Commands::Move { game_id, san } => {
            let root = load_root(&store, &game_id)?;
            let mut resolver = HeadResolver::new(root.clone());
            let head = resolver.resolve(&store)?.clone();
            let identity = cfg.identity()?;
            if let Some(ev) =
                publish::publish_move(&store, identity.as_ref(), &root, &head, &san).await?
            {
                println!("{}", ev.id);
            }
        }
        Commands::Show { game_id } => {
            let root = load_root(&store, &game_id)?;
            let mut resolver = HeadResolver::new(root);
            println!("game: {}", resolver.game_id());
            let head = resolver.resolve(&store)?;
            println!("head: {}", head.id());
            println!("fen: {}", head.fen());
            if !head.history().is_empty() {
                println!("pgn: {}", head.pgn());
            }
            let to_move = if head.position().turn().is_white() {
                "white"
            } else {
                "black"
            };
            println!("{to_move} to move");
            if resolver.awaiting_more_successors() {
                println!("(more successors pending)");
            }
        }
        Commands::Watch { game_id } => {
            let root = load_root(&store, &game_id)?;
            let mut resolver = HeadResolver::new(root);
            // Other processes may append to the same store directory without
            // going through this handle, so poll as a fallback trigger.
            let poller = store.clone();
            let ticker = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(2));
                loop {
                    interval.tick().await;
                    poller.notify();
                }
            });
            resolver::watch(
                &store,
                &mut resolver,
                |head| println!("head: {} fen: {}", head.id(), head.fen()),
                shutdown_signal(),
            )
            .await?;
            ticker.abort();
        }
        Commands::Games => {
            for ev in store.game_roots()? {
                println!("{} {} {}", ev.id, ev.pubkey, ev.created_at);
            }
        }
        Commands::Filter { game_id } => match game_id {
            Some(game_id) => {
                let root = load_root(&store, &game_id)?;
                println!("{}", filter::game_filter(&root));
            }
            None => {
                let mut registry = filter::FilterRegistry::new();
                for ev in store.game_roots()? {
                    if let Ok(root) = game::GameStart::from_event(ev) {
                        registry.add(&root);
                    }
                }
                println!("{}", registry.subscription("chesstr"));
            }
        },
    }
    Ok(())
}

/// Load and wrap a game's root event, failing when it has not arrived.
fn load_root(store: &Store, game_id: &str) -> anyhow::Result<GameStart> {
    let ev = store
        .get(game_id)?
        .ok_or_else(|| anyhow!("game not found: {game_id}"))?;
    Ok(GameStart::from_event(ev)?)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("chesstr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", store_root.to_string_lossy()));
    content.push_str("VERIFY_SIG=1\n");
    content.push_str("SECRET_KEY=\n");
    fs::write(env_path, content)?;
    Ok(())
}

/// Set or replace `key=value` in the env file, keeping other lines intact.
fn write_env_var(env_path: &str, key: &str, value: &str) -> anyhow::Result<()> {
    let content = fs::read_to_string(env_path)?;
    let mut new_content = String::new();
    let mut replaced = false;
    for line in content.lines() {
        if line.starts_with(&format!("{key}=")) {
            new_content.push_str(&format!("{key}={value}\n"));
            replaced = true;
        } else {
            new_content.push_str(line);
            new_content.push('\n');
        }
    }
    if !replaced {
        new_content.push_str(&format!("{key}={value}\n"));
    }
    fs::write(env_path, new_content)?;
    std::env::set_var(key, value);
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    run(cli).await
}
