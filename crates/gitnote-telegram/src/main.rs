//! gitnote Telegram bot binary.
//!
//! Start the bot with:
//! ```bash
//! BOT_TOKEN=xxx GIT_REPO_URL=https://github.com/me/notes.git cargo run -p gitnote-telegram
//! ```

use std::sync::Arc;

use clap::Parser;
use gitnote_core::{BotConfig, NoteService};
use gitnote_telegram::TelegramBot;
use tracing_subscriber::EnvFilter;

/// gitnote - save Telegram messages as notes in a git repository
#[derive(Parser, Debug)]
#[command(name = "gitnote-telegram")]
#[command(about = "Telegram bot that saves messages as files in a git repository")]
struct Args {
    /// Long-poll for updates even when WEBHOOK_URL is set
    #[arg(long)]
    polling: bool,

    /// Listener port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());

    // RUST_LOG wins over -v
    let filter = match args.verbose {
        0 => "gitnote_telegram=info,gitnote_core=info,teloxide=warn",
        1 => "gitnote_telegram=debug,gitnote_core=debug,teloxide=info",
        2 => "gitnote_telegram=trace,gitnote_core=trace,teloxide=debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    tracing::debug!(config = ?config, "Configuration loaded");

    let bot = TelegramBot::new(config.clone());
    let username = match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, "Bot initialized successfully");
            username
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    };

    let service = NoteService::from_config(&config)?.with_bot_username(username.clone());
    if let Err(e) = service.prepare().await {
        tracing::warn!(error = %e, "Working copy not ready, retrying on the first note");
    }
    let service = Arc::new(service);

    let use_webhook = config.webhook_url.is_some() && !args.polling;
    println!("\n[robot] gitnote Telegram Bot");
    println!("   Bot: @{}", username);
    println!("   Repository: {} ({})", config.git.display_url(), config.git.branch);
    println!("   Mode: {}", if use_webhook { "webhook" } else { "polling" });
    println!("   Listening on {}", config.bind_address());
    println!("   Press Ctrl+C to stop\n");

    if use_webhook {
        bot.start_webhook(service).await?;
    } else {
        bot.start_polling(service).await?;
    }

    Ok(())
}
