//! tabmux: multiplexed remote shells in the terminal.
//!
//! Runs several reconnecting shell sessions side by side in one tab,
//! records them to asciicast files and plays recordings back.

mod commands;
mod config;
mod terminal;

use clap::{Parser, Subcommand};
use tracing::error;

/// tabmux: tabbed remote shell multiplexer
#[derive(Parser)]
#[command(name = "tabmux", version = "0.1.0", about = "Multiplexed remote shells with session recording and playback")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open an interactive multiplexed session
    Connect {
        /// Shell server endpoint (ws:// or wss://)
        #[arg(long)]
        url: Option<String>,

        /// Auth token sent when a shell attaches
        #[arg(long)]
        token: Option<String>,

        /// Tab id; recordings are filed under it
        #[arg(long, default_value = "main")]
        tab: String,

        /// Record the tab from the start
        #[arg(long)]
        record: bool,
    },

    /// Play a recorded cast file in the terminal
    Play {
        /// Path to the .cast file
        file: String,

        /// Playback speed (1, 2, 4 or 0.5)
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },

    /// Manage saved recordings
    Recordings {
        #[command(subcommand)]
        action: RecordingsAction,
    },
}

#[derive(Subcommand)]
enum RecordingsAction {
    /// List recordings of a tab, or every tab with recordings
    List {
        tab: Option<String>,
    },

    /// Print the final screen of a recording
    Show {
        tab: String,
        name: String,
    },

    /// Delete a recording
    Delete {
        tab: String,
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with the raw terminal stream.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("tabmux=debug,tabmux_cli=debug,tabmux_client=debug,tabmux_core=debug")
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("tabmux=warn,tabmux_cli=warn")
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config::default_path().to_string_lossy().to_string());
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("tabmux: {e:#}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Connect {
            url,
            token,
            tab,
            record,
        } => {
            let opts = commands::connect::ConnectOpts {
                url: url.unwrap_or_else(|| cfg.server.url.clone()),
                token: token.unwrap_or_else(|| cfg.server.token.clone()),
                tab,
                record: record || cfg.recording.auto_record,
                scrollback: cfg.terminal.scrollback,
                recordings_dir: cfg.recordings_dir(),
            };
            commands::connect::run(opts).await
        }
        Command::Play { file, speed } => commands::play::run(&file, speed).await,
        Command::Recordings { action } => {
            let store = commands::recordings::store(&cfg);
            match action {
                RecordingsAction::List { tab } => {
                    store.and_then(|s| commands::recordings::run_list(&s, tab.as_deref()))
                }
                RecordingsAction::Show { tab, name } => {
                    store.and_then(|s| commands::recordings::run_show(&s, &tab, &name))
                }
                RecordingsAction::Delete { tab, name } => {
                    store.and_then(|mut s| commands::recordings::run_delete(&mut s, &tab, &name))
                }
            }
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("tabmux: {e:#}");
        std::process::exit(1);
    }
}
