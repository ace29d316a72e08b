pub mod commands;
pub mod messages;
pub mod notifier;

pub use commands::{start_bot, BotDeps};
pub use notifier::{run_notifier, TelegramSink};
