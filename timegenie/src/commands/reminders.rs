//! Reminder-related commands
//!
//! Create, list and delete reminders on behalf of a chat owner.

use crate::app::AppState;
use crate::config::MAX_BODY_CHARS;
use crate::database::{OwnerId, Reminder};
use crate::error::{AppError, Result};
use crate::services::TurnRejection;
use crate::time::{normalize, TimeParser, TimeRejection};
use chrono::{DateTime, Utc};

pub const QUICK_USAGE: &str =
    "Use /remind <date and time>, <message>, or just /remind to be asked step by step.";

/// Begin the step-by-step intake
pub async fn start_intake(state: &AppState, owner_id: OwnerId, now: DateTime<Utc>) -> Result<String> {
    Ok(state.intake.start(owner_id, now).await.text)
}

/// Feed a plain text turn to the owner's intake
pub async fn submit_turn(
    state: &AppState,
    owner_id: OwnerId,
    text: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    match state.intake.handle_text(owner_id, text, now).await? {
        Some(reply) => Ok(reply.text),
        None => Ok(format!("I'm not waiting for anything right now. {}", QUICK_USAGE)),
    }
}

/// Abandon the owner's intake
pub async fn cancel_intake(state: &AppState, owner_id: OwnerId) -> Result<String> {
    if state.intake.cancel(owner_id).await {
        Ok("Okay, reminder discarded.".to_string())
    } else {
        Ok("There is nothing to cancel.".to_string())
    }
}

/// One-shot form: `<when>, <message>`
pub async fn quick_remind(
    state: &AppState,
    owner_id: OwnerId,
    args: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let Some((when, body)) = args.split_once(',') else {
        return Ok(format!("❌ Incorrect format. {}", QUICK_USAGE));
    };

    let fire_at = match state
        .parser
        .parse(when, now)
        .and_then(|raw| normalize(&raw, now))
    {
        Ok(fire_at) => fire_at,
        Err(rejection) => {
            return Ok(format!("❌ {}. {}", capitalize(&rejection.to_string()), QUICK_USAGE))
        }
    };

    let body = body.trim();
    if body.is_empty() {
        let rejection = TurnRejection::EmptyBody;
        return Ok(format!("❌ {}. {}", capitalize(&rejection.to_string()), QUICK_USAGE));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        let rejection = TurnRejection::BodyTooLong(MAX_BODY_CHARS);
        return Ok(format!("❌ {}.", capitalize(&rejection.to_string())));
    }

    match state
        .reminders
        .create_reminder(owner_id, fire_at, body.to_string())
        .await
    {
        Ok(reminder) => Ok(format!(
            "✅ Reminder #{} set for {} UTC.",
            reminder.id,
            reminder.fire_at.format("%Y-%m-%d %H:%M")
        )),
        Err(AppError::PastInstant(_)) => {
            let rejection = TimeRejection::PastInstant;
            Ok(format!("❌ {}. {}", capitalize(&rejection.to_string()), QUICK_USAGE))
        }
        Err(AppError::AlreadyArmed(_)) => {
            Ok("❌ Sorry, I couldn't create that reminder. Please try again.".to_string())
        }
        Err(e) => Err(e),
    }
}

/// List the owner's pending reminders, soonest first
pub async fn list_reminders(state: &AppState, owner_id: OwnerId) -> Result<String> {
    let reminders = state.reminders.list_reminders(owner_id).await?;
    Ok(format_reminder_list(&reminders))
}

/// Delete one of the owner's reminders by id
pub async fn delete_reminder(state: &AppState, owner_id: OwnerId, args: &str) -> Result<String> {
    let Ok(id) = args.trim().trim_start_matches('#').parse::<i64>() else {
        return Ok(
            "❌ Please give the reminder number, e.g. /delete 3. Use /reminders to see them."
                .to_string(),
        );
    };

    match state.reminders.delete_reminder(id, owner_id).await {
        Ok(()) => Ok(format!("✅ Deleted reminder #{}.", id)),
        Err(AppError::NotFoundOrNotOwned) => Ok(format!("❌ Reminder #{} not found.", id)),
        Err(e) => Err(e),
    }
}

pub fn format_reminder_list(reminders: &[Reminder]) -> String {
    if reminders.is_empty() {
        return "📋 You don't have any pending reminders.".to_string();
    }

    let mut list = String::from("📋 Your pending reminders:\n");
    for reminder in reminders {
        list.push_str(&format!(
            "#{}  {} UTC  {}\n",
            reminder.id,
            reminder.fire_at.format("%Y-%m-%d %H:%M"),
            reminder.body
        ));
    }
    list.push_str("Use /delete <number> to remove one.");
    list
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reminder(id: i64, hour: u32, body: &str) -> Reminder {
        Reminder {
            id,
            owner_id: 1,
            fire_at: Utc.with_ymd_and_hms(2026, 10, 17, hour, 0, 0).unwrap(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_empty_list() {
        assert_eq!(
            format_reminder_list(&[]),
            "📋 You don't have any pending reminders."
        );
    }

    #[test]
    fn test_format_list() {
        let text = format_reminder_list(&[reminder(3, 9, "pay rent"), reminder(5, 18, "call mom")]);

        assert_eq!(
            text,
            "📋 Your pending reminders:\n\
             #3  2026-10-17 09:00 UTC  pay rent\n\
             #5  2026-10-17 18:00 UTC  call mom\n\
             Use /delete <number> to remove one."
        );
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("could not"), "Could not");
        assert_eq!(capitalize(""), "");
    }
}
