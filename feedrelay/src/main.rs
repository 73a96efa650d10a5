//! feedrelay - relay an account's new posts to a messaging channel
//!
//! Polls the feed source for posts newer than the saved cursor and forwards
//! them, oldest first, to the configured chat.

use clap::Parser;
use libfeedrelay::config::{Config, ENV_CONFIG_PATH};
use libfeedrelay::logging::{LogFormat, LoggingConfig};
use libfeedrelay::platforms::telegram::TelegramSink;
use libfeedrelay::platforms::twitter::TwitterSource;
use libfeedrelay::platforms::http_client;
use libfeedrelay::relay::{BackoffCause, RelaySettings, SystemClock};
use libfeedrelay::{FileCursorStore, Relay, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "feedrelay")]
#[command(version)]
#[command(about = "Relay new posts from one account to a messaging channel")]
#[command(long_about = "\
feedrelay - relay new posts from one account to a messaging channel

DESCRIPTION:
    feedrelay is a long-running daemon. It resolves the configured account
    once, then polls for posts newer than the last one it forwarded and
    sends each of them, oldest first, to the destination chat.

    The id of the last forwarded post is saved after every delivery, so a
    restart picks up where the previous run stopped.

USAGE:
    # Configure from the environment only
    TWITTER_BEARER_TOKEN=... TELEGRAM_BOT_TOKEN=... TELEGRAM_CHAT_ID=... \\
    FEEDRELAY_HANDLE=MycelialOracle feedrelay

    # Poll every 5 minutes with verbose logging
    feedrelay --poll-interval 300 --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current delivery)

CONFIGURATION:
    Configuration file: ~/.config/feedrelay/config.toml (optional)
    Cursor file:        ~/.local/share/feedrelay/last_post_id.txt

    [source]
    handle = \"MycelialOracle\"
    page_size = 5

    [relay]
    poll_interval = 120   # seconds between polls
    error_backoff = 60    # seconds to wait after a failure
    rate_limit_floor = 60 # minimum wait when rate limited
    pacing = 1            # seconds between consecutive messages

EXIT CODES:
    0 - Clean shutdown
    1 - Account resolution or runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH", env = ENV_CONFIG_PATH)]
    config: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Run a single poll/deliver cycle and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.log_format, cli.verbose).init();

    match run(cli).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Start the relay and return the process exit code
async fn run(cli: Cli) -> Result<i32> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(poll_interval) = cli.poll_interval {
        config.relay.poll_interval = poll_interval;
    }
    config.validate()?;

    let settings = RelaySettings::from_config(&config)?;
    let client = http_client()?;
    let source = TwitterSource::from_config(&config.source, client.clone())?;
    let sink = TelegramSink::from_config(&config.sink, client)?;
    let cursor_path = config.cursor_path()?;

    info!("feedrelay starting");
    info!(cursor_file = %cursor_path.display(), "Poll interval: {}s", config.relay.poll_interval);

    let relay = Relay::start(
        settings,
        Box::new(source),
        Box::new(sink),
        Box::new(FileCursorStore::new(cursor_path)),
        Box::new(SystemClock),
    )
    .await?;

    if cli.once {
        let mut relay = relay;
        let backoff = relay.run_cycle().await;
        info!(cursor = ?relay.cursor(), "feedrelay: ran one cycle, exiting");
        return Ok(if backoff.cause == BackoffCause::PollInterval { 0 } else { 1 });
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone());

    relay.with_shutdown(shutdown).run().await;

    info!("feedrelay stopped");
    Ok(0)
}

/// Set the shutdown flag on SIGINT/SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::sync::atomic::Ordering;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            warn!("Signal setup failed, graceful shutdown unavailable: {}", e);
            return;
        }
    };

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) {
    warn!("Graceful shutdown on signals is only supported on Unix");
}
