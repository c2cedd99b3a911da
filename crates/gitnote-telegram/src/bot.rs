//! Main Telegram bot implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use gitnote_core::{BotConfig, Command, NoteService};
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::BotCommand;
use teloxide::update_listeners::webhooks::{self, Options};
use teloxide::update_listeners::UpdateListener;
use teloxide::RequestError;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TelegramError};
use crate::handlers::handle_message;
use crate::server::{self, AppState};

/// The Telegram bot for gitnote.
pub struct TelegramBot {
    /// The teloxide bot instance.
    bot: Bot,
    config: Arc<BotConfig>,
}

impl TelegramBot {
    /// Create a new TelegramBot from a loaded configuration.
    pub fn new(config: BotConfig) -> Self {
        let bot = Bot::new(&config.bot_token);
        Self {
            bot,
            config: Arc::new(config),
        }
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| TelegramError::BotStartFailed(e.to_string()))?;
        Ok(me.username().to_string())
    }

    /// Serve the webhook and health routes on one listener.
    ///
    /// Registers the webhook with Telegram and runs until Ctrl+C.
    pub async fn start_webhook(&self, service: Arc<NoteService>) -> Result<()> {
        let url = self
            .config
            .webhook_url
            .clone()
            .ok_or_else(|| TelegramError::WebhookFailed("WEBHOOK_URL is not set".to_string()))?;
        let addr: SocketAddr = self
            .config
            .bind_address()
            .parse()
            .map_err(|_| TelegramError::InvalidAddress(self.config.bind_address()))?;

        info!(url = %url, addr = %addr, "Starting Telegram bot with webhook...");
        self.register_commands().await;

        let mut options = Options::new(addr, url);
        if let Some(secret) = &self.config.secret_token {
            options = options.secret_token(secret.clone());
        }

        let (mut listener, stop_flag, webhook_routes) =
            webhooks::axum_to_router(self.bot.clone(), options)
                .await
                .map_err(|e| TelegramError::WebhookFailed(e.to_string()))?;

        let app = webhook_routes.merge(server::create_router(AppState::new(
            Arc::clone(&self.config),
            Arc::clone(&service),
        )));
        let tcp = tokio::net::TcpListener::bind(addr).await?;
        let stop_token = listener.stop_token();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(tcp, app)
                .with_graceful_shutdown(stop_flag)
                .await
            {
                error!(error = %e, "HTTP server failed");
                stop_token.stop();
            }
        });

        info!("Bot is running! Send /start to begin.");

        Dispatcher::builder(self.bot.clone(), schema())
            .dependencies(dptree::deps![service])
            .default_handler(|upd| async move {
                debug!(update = ?upd.id, "Unhandled update");
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the webhook listener"),
            )
            .await;

        Ok(())
    }

    /// Start the bot in polling mode.
    ///
    /// The health routes are still served on the configured port.
    pub async fn start_polling(&self, service: Arc<NoteService>) -> Result<()> {
        info!("Starting Telegram bot in polling mode...");
        self.register_commands().await;

        server::spawn(AppState::new(
            Arc::clone(&self.config),
            Arc::clone(&service),
        ));

        info!("Bot is running! Send /start to begin.");

        Dispatcher::builder(self.bot.clone(), schema())
            .dependencies(dptree::deps![service])
            .default_handler(|upd| async move {
                debug!(update = ?upd.id, "Unhandled update");
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }

    /// Publish the command list shown in Telegram's command menu.
    async fn register_commands(&self) {
        let commands: Vec<BotCommand> = Command::ALL
            .into_iter()
            .filter(|c| !c.admin_only())
            .map(|c| BotCommand::new(c.name(), c.description()))
            .collect();

        if let Err(e) = self.bot.set_my_commands(commands).await {
            warn!(error = %e, "Failed to register bot commands");
        }
    }
}

/// Every update that carries a message goes to [`handle_message`].
fn schema() -> UpdateHandler<RequestError> {
    Update::filter_message().endpoint(handle_message)
}
