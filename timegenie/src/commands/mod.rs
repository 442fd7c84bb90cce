//! Chat commands
//!
//! Maps an owner's chat text onto the engine. Commands start with `/`;
//! anything else is a turn of the owner's current intake.
//! - `reminders`: intake, quick creation, listing and deletion

pub mod reminders;

use crate::app::AppState;
use crate::database::OwnerId;
use crate::error::Result;
use chrono::{DateTime, Utc};

pub use reminders::*;

pub const WELCOME: &str = "Welcome to TimeGenie! Use /remind <date and time>, <message> to set a reminder, \
or /remind on its own and I'll ask for the details. \
/reminders lists what's pending, /delete <number> removes one and /cancel stops a reminder in progress.";

/// A parsed chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    Help,
    Remind(&'a str),
    Cancel,
    List,
    Delete(&'a str),
    Unknown(&'a str),
    Text(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(text: &'a str) -> Self {
        let text = text.trim();

        let Some(rest) = text.strip_prefix('/') else {
            return Command::Text(text);
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        // Group chats address bots as /command@BotName
        let name = name.split('@').next().unwrap_or(name);

        match name.to_lowercase().as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "remind" => Command::Remind(args),
            "cancel" => Command::Cancel,
            "reminders" | "list" => Command::List,
            "delete" | "forget" => Command::Delete(args),
            _ => Command::Unknown(name),
        }
    }
}

/// Handle one chat message from `owner_id` and return the reply text
pub async fn dispatch(
    state: &AppState,
    owner_id: OwnerId,
    text: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let command = Command::parse(text);
    tracing::debug!("Owner {} sent {:?}", owner_id, command);

    match command {
        Command::Start | Command::Help => Ok(WELCOME.to_string()),
        Command::Remind("") => start_intake(state, owner_id, now).await,
        Command::Remind(args) => quick_remind(state, owner_id, args, now).await,
        Command::Cancel => cancel_intake(state, owner_id).await,
        Command::List => list_reminders(state, owner_id).await,
        Command::Delete(args) => delete_reminder(state, owner_id, args).await,
        Command::Unknown(name) => Ok(format!("Unknown command /{}. Try /help.", name)),
        Command::Text(text) => submit_turn(state, owner_id, text, now).await,
    }
}
