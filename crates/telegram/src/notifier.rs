use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::{Error, NotificationSink, Result, SignalEvent};

use crate::messages;

/// Broadcasts rendered events to every subscribed chat.
pub struct TelegramSink {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat_ids: &[i64]) -> Self {
        Self {
            bot,
            chat_ids: chat_ids.iter().map(|&id| ChatId(id)).collect(),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    /// Fails only when no chat received the message.
    async fn publish(&self, event: &SignalEvent) -> Result<()> {
        let text = messages::render(event);
        let delivered = send_alert(&self.bot, &self.chat_ids, &text).await;
        if delivered == 0 && !self.chat_ids.is_empty() {
            return Err(Error::Notify(format!(
                "message not delivered to any of {} chats",
                self.chat_ids.len()
            )));
        }
        Ok(())
    }
}

/// Pause between chats to stay under Telegram's broadcast rate limit.
const SEND_SPACING: Duration = Duration::from_millis(50);

/// Send `message` to every chat, returning how many succeeded.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) -> usize {
    let mut delivered = 0;
    for (i, &chat_id) in chat_ids.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(SEND_SPACING).await;
        }
        match bot.send_message(chat_id, message).await {
            Ok(_) => delivered += 1,
            Err(e) => warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram message"),
        }
    }
    delivered
}

/// Drain watchlist events into `sink` until every sender is dropped.
/// Call from `tokio::spawn`.
pub async fn run_notifier(mut event_rx: mpsc::Receiver<SignalEvent>, sink: Arc<dyn NotificationSink>) {
    info!("Notifier running");
    while let Some(event) = event_rx.recv().await {
        if let Err(e) = sink.publish(&event).await {
            warn!(error = %e, "Notification dropped");
        }
    }
    warn!("Notifier: event channel closed");
}
