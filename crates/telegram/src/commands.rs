use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tokio::sync::Mutex;
use tracing::{info, warn};

use watchlist::WatchlistStateMachine;

use crate::messages;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub watchlist: Arc<Mutex<WatchlistStateMachine>>,
    /// Chats that receive broadcasts; only these may query the bot.
    pub chat_ids: Arc<Vec<i64>>,
}

/// Read-only commands for subscribed chats.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "SignalBot commands:")]
pub enum Command {
    #[command(description = "How signals are produced")]
    Help,
    #[command(description = "Today's signal statistics")]
    Stats,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(handle_help))
        .branch(case![Command::Stats].endpoint(handle_stats));

    Update::filter_message()
        .filter_map(|msg: Message| Some(msg.chat.id))
        .filter_async(chat_filter)
        .branch(command_handler)
}

/// Silently drop messages from chats that are not subscribed.
async fn chat_filter(chat_id: ChatId, deps: Arc<BotDeps>) -> bool {
    let allowed = deps.chat_ids.contains(&chat_id.0);
    if !allowed {
        warn!(chat_id = chat_id.0, "Message from unsubscribed chat ignored");
    }
    allowed
}

pub fn help_text() -> String {
    format!(
        "{}\n\n\
         The market is scanned four times an hour (minutes 1, 16, 31, 46) during active hours.\n\
         Only setups scoring 100 are broadcast. Each signal is tracked until its stop or \
         first target is hit, and a summary is sent at the end of the day.",
        Command::descriptions()
    )
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, help_text()).await?;
    Ok(())
}

async fn handle_stats(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let (stats, open) = {
        let wl = deps.watchlist.lock().await;
        (wl.stats(), wl.active_signals().len())
    };
    bot.send_message(msg.chat.id, messages::render_stats(&stats, open))
        .await?;
    Ok(())
}
