//! LingChat headless client.
//!
//! Connects to the backend, prints the paced presentation to stdout and
//! sends stdin lines as chat messages. See the `lingchat_client` library
//! for the core functionality.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lingchat_client::achievement::AchievementDraft;
use lingchat_client::env::Environment;
use lingchat_client::narrative::processor::StageSignal;
use lingchat_client::session::SessionEvent;
use lingchat_client::state::MessageKind;
use lingchat_client::ws::WsConnector;
use lingchat_client::{Config, Session};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Global allocator; mimalloc outperforms the system allocator for the
/// many small allocations JSON decoding produces.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "lingchat-client")]
#[command(version = VERSION)]
#[command(about = "Headless realtime client for the LingChat backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and chat from the terminal
    Run {
        /// WebSocket URL (defaults to the resolved backend endpoint)
        #[arg(long)]
        url: Option<String>,
        /// Display name for your own lines
        #[arg(long)]
        user: Option<String>,
    },
    /// Print the effective configuration
    Config,
    /// Print the resolved WebSocket URL
    Url,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    // Keep stdout for the conversation when logging to a file.
    if let Ok(path) = std::env::var("LINGCHAT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn print_signal(signal: &StageSignal) {
    match signal {
        StageSignal::LineAppended(line) => match line.kind {
            MessageKind::Narration => println!("  ({})", line.content),
            MessageKind::Message => println!("> {}: {}", line.display_name, line.content),
            MessageKind::Reply => {
                let emotion = line
                    .emotion
                    .as_deref()
                    .map(|e| format!(" [{e}]"))
                    .unwrap_or_default();
                let motion = line
                    .motion_text
                    .as_deref()
                    .map(|m| format!(" *{m}*"))
                    .unwrap_or_default();
                println!("{}{emotion}:{motion} {}", line.display_name, line.content);
            }
        },
        StageSignal::SceneChanged(scene) => println!("~ scene: {}", scene.image_path),
        StageSignal::CharacterChanged { character, emotion } => match emotion {
            Some(emotion) => println!("~ {character} ({emotion})"),
            None => println!("~ {character}"),
        },
    }
}

/// Handle one line typed by the user. Returns `false` to quit.
fn handle_input(session: &Session, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => return false,
        ("/story", name) if !name.is_empty() => session.enter_story_mode(name.trim()),
        ("/exit-story", _) => session.exit_story_mode(),
        ("/unlock", title) if !title.is_empty() => {
            if !session.unlock_achievement(&AchievementDraft::new(title.trim(), "")) {
                eprintln!("! unlock request not sent");
            }
        }
        _ => {
            if !session.send_message(line) {
                eprintln!("! message not sent");
            }
        }
    }
    true
}

async fn run(url: Option<String>, user: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(user) = user {
        config.user_name = user;
    }
    let url = url.unwrap_or_else(|| config.websocket_url(Environment::current()));

    println!("LingChat client v{VERSION}, connecting to {url}");
    log::info!("LingChat client v{VERSION} started");

    let mut session = Session::start(&config, url, Arc::new(WsConnector));
    let mut achievements = session.subscribe_achievements();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if !handle_input(&session, &line) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            Some(event) = session.next_event() => match event {
                SessionEvent::Signal(signal) => print_signal(&signal),
                SessionEvent::Notice(notice) => eprintln!("! {}", notice.message),
            },
            Ok(()) = achievements.changed() => {
                let view = achievements.borrow_and_update().clone();
                if let (true, Some(current)) = (view.is_visible, view.current) {
                    println!("* Achievement unlocked: {} - {}", current.title, current.message);
                }
            }
        }
    }

    println!("Shutting down...");
    session.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { url, user } => run(url, user).await?,
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Url => {
            let config = Config::load()?;
            println!("{}", config.websocket_url(Environment::current()));
        }
    }

    Ok(())
}
