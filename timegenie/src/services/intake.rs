//! Conversational reminder intake
//!
//! Collects a future instant and then a message body from one owner over
//! successive turns. Each turn is handled independently against the
//! owner's in-memory draft; nothing blocks waiting for the next turn.
//!
//! ```text
//! Start -> AwaitingTime -> AwaitingMessage -> Committed
//!              |                 |
//!              +----> Canceled <-+
//! ```

use crate::config::MAX_BODY_CHARS;
use crate::database::{OwnerId, Reminder};
use crate::error::{AppError, Result};
use crate::services::ReminderService;
use crate::time::{normalize, TimeParser, TimeRejection};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub const TIME_PROMPT: &str =
    "When should I remind you? For example `tomorrow 09:00`, `2026-12-24 18:00 Europe/Oslo` or `in 2h`.";
pub const MESSAGE_PROMPT: &str = "What should I remind you about?";
pub const CREATION_FAILED: &str = "Sorry, I couldn't create that reminder. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeState {
    Start,
    AwaitingTime,
    AwaitingMessage,
    Committed,
    Canceled,
}

/// Why a turn was not accepted; the machine stays where it was
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnRejection {
    #[error("{0}")]
    Time(#[from] TimeRejection),

    #[error("the reminder message is empty")]
    EmptyBody,

    #[error("the reminder message is longer than {0} characters")]
    BodyTooLong(usize),
}

impl TurnRejection {
    fn reprompt(&self) -> String {
        match self {
            TurnRejection::Time(TimeRejection::PastInstant) => {
                format!("That time has already passed. {}", TIME_PROMPT)
            }
            TurnRejection::Time(TimeRejection::UnknownZone(zone)) => {
                format!("I don't know the timezone `{}`. {}", zone, TIME_PROMPT)
            }
            TurnRejection::Time(TimeRejection::Unparseable) => {
                format!("I couldn't understand that time. {}", TIME_PROMPT)
            }
            TurnRejection::EmptyBody => {
                format!("The reminder can't be empty. {}", MESSAGE_PROMPT)
            }
            TurnRejection::BodyTooLong(max) => {
                format!("Please keep it under {} characters. {}", max, MESSAGE_PROMPT)
            }
        }
    }
}

/// Result of one turn, ready to be sent back to the owner
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub state: IntakeState,
    pub text: String,
    pub rejection: Option<TurnRejection>,
    pub reminder: Option<Reminder>,
}

impl TurnReply {
    fn new(state: IntakeState, text: impl Into<String>) -> Self {
        Self {
            state,
            text: text.into(),
            rejection: None,
            reminder: None,
        }
    }

    fn rejected(state: IntakeState, rejection: TurnRejection) -> Self {
        Self {
            state,
            text: rejection.reprompt(),
            rejection: Some(rejection),
            reminder: None,
        }
    }
}

/// In-progress reminder for one owner
#[derive(Debug, Clone)]
struct Draft {
    state: IntakeState,
    fire_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IntakeMachine {
    drafts: Arc<Mutex<HashMap<OwnerId, Draft>>>,
    parser: Arc<dyn TimeParser>,
    reminders: ReminderService,
    max_body_chars: usize,
}

impl IntakeMachine {
    pub fn new(reminders: ReminderService, parser: Arc<dyn TimeParser>) -> Self {
        Self {
            drafts: Arc::new(Mutex::new(HashMap::new())),
            parser,
            reminders,
            max_body_chars: MAX_BODY_CHARS,
        }
    }

    pub fn with_max_body_chars(mut self, max_body_chars: usize) -> Self {
        self.max_body_chars = max_body_chars;
        self
    }

    /// Begin a new intake, replacing any draft already in flight
    pub async fn start(&self, owner_id: OwnerId, now: DateTime<Utc>) -> TurnReply {
        let replaced = self.drafts.lock().await.insert(
            owner_id,
            Draft {
                state: IntakeState::AwaitingTime,
                fire_at: None,
                updated_at: now,
            },
        );

        if replaced.is_some() {
            tracing::debug!("Owner {} restarted intake, previous draft discarded", owner_id);
        }

        TurnReply::new(IntakeState::AwaitingTime, TIME_PROMPT)
    }

    /// Feed one user turn to the owner's draft.
    ///
    /// Returns `None` when the owner has no intake in flight.
    pub async fn handle_text(
        &self,
        owner_id: OwnerId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TurnReply>> {
        let mut drafts = self.drafts.lock().await;

        let Some(draft) = drafts.get_mut(&owner_id) else {
            return Ok(None);
        };
        draft.updated_at = now;

        match draft.state {
            IntakeState::AwaitingTime => {
                let resolved = self
                    .parser
                    .parse(text, now)
                    .and_then(|raw| normalize(&raw, now));

                match resolved {
                    Ok(fire_at) => {
                        draft.fire_at = Some(fire_at);
                        draft.state = IntakeState::AwaitingMessage;
                        tracing::debug!("Owner {} chose {}", owner_id, fire_at);

                        Ok(Some(TurnReply::new(
                            IntakeState::AwaitingMessage,
                            format!(
                                "Got it, {} UTC. {}",
                                fire_at.format("%Y-%m-%d %H:%M"),
                                MESSAGE_PROMPT
                            ),
                        )))
                    }
                    Err(rejection) => {
                        tracing::debug!("Owner {} time rejected: {}", owner_id, rejection);
                        Ok(Some(TurnReply::rejected(
                            IntakeState::AwaitingTime,
                            rejection.into(),
                        )))
                    }
                }
            }
            IntakeState::AwaitingMessage => {
                let body = text.trim();

                if body.is_empty() {
                    return Ok(Some(TurnReply::rejected(
                        IntakeState::AwaitingMessage,
                        TurnRejection::EmptyBody,
                    )));
                }
                if body.chars().count() > self.max_body_chars {
                    return Ok(Some(TurnReply::rejected(
                        IntakeState::AwaitingMessage,
                        TurnRejection::BodyTooLong(self.max_body_chars),
                    )));
                }

                let Some(fire_at) = draft.fire_at else {
                    return Err(AppError::Generic(format!(
                        "Draft for owner {} awaits a message without a time",
                        owner_id
                    )));
                };

                // The chosen time can pass while we wait for the message
                if fire_at <= now {
                    tracing::debug!("Owner {} draft time {} passed before commit", owner_id, fire_at);
                    draft.state = IntakeState::AwaitingTime;
                    draft.fire_at = None;
                    return Ok(Some(TurnReply::rejected(
                        IntakeState::AwaitingTime,
                        TimeRejection::PastInstant.into(),
                    )));
                }

                // The draft leaves the map before committing, so a concurrent
                // turn cannot commit it twice
                drafts.remove(&owner_id);
                drop(drafts);

                self.commit(owner_id, fire_at, body.to_string(), now)
                    .await
                    .map(Some)
            }
            state => Err(AppError::Generic(format!(
                "Draft for owner {} is in terminal state {:?}",
                owner_id, state
            ))),
        }
    }

    /// Abandon the owner's draft. Returns whether one was in flight.
    pub async fn cancel(&self, owner_id: OwnerId) -> bool {
        let removed = self.drafts.lock().await.remove(&owner_id).is_some();
        if removed {
            tracing::debug!("Owner {} canceled intake", owner_id);
        }
        removed
    }

    /// Current intake state for the owner, if any draft is in flight
    pub async fn state(&self, owner_id: OwnerId) -> Option<IntakeState> {
        self.drafts.lock().await.get(&owner_id).map(|d| d.state)
    }

    /// Drop drafts whose last turn is older than `cutoff`
    pub async fn expire_drafts(&self, cutoff: DateTime<Utc>) -> usize {
        let mut drafts = self.drafts.lock().await;
        let before = drafts.len();
        drafts.retain(|_, draft| draft.updated_at >= cutoff);
        let expired = before - drafts.len();

        if expired > 0 {
            tracing::info!("Expired {} abandoned drafts", expired);
        }
        expired
    }

    async fn commit(
        &self,
        owner_id: OwnerId,
        fire_at: DateTime<Utc>,
        body: String,
        now: DateTime<Utc>,
    ) -> Result<TurnReply> {
        match self.reminders.create_reminder(owner_id, fire_at, body).await {
            Ok(reminder) => {
                let text = format!(
                    "Reminder #{} set for {} UTC.",
                    reminder.id,
                    reminder.fire_at.format("%Y-%m-%d %H:%M")
                );
                let mut reply = TurnReply::new(IntakeState::Committed, text);
                reply.reminder = Some(reminder);
                Ok(reply)
            }
            Err(AppError::PastInstant(_)) => {
                // Lost to the clock between the check above and the insert
                self.drafts.lock().await.insert(
                    owner_id,
                    Draft {
                        state: IntakeState::AwaitingTime,
                        fire_at: None,
                        updated_at: now,
                    },
                );
                Ok(TurnReply::rejected(
                    IntakeState::AwaitingTime,
                    TimeRejection::PastInstant.into(),
                ))
            }
            Err(AppError::AlreadyArmed(id)) => {
                tracing::error!("Internal error committing reminder {} for {}", id, owner_id);
                Ok(TurnReply::new(IntakeState::Canceled, CREATION_FAILED))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{test_repository, Repository};
    use crate::services::SchedulerService;
    use crate::time::{RawTime, SimpleTimeParser};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    async fn create_test_machine(
        parser: Arc<dyn TimeParser>,
    ) -> (IntakeMachine, Repository, SchedulerService) {
        let repo = test_repository().await;
        let (scheduler, _fired) = SchedulerService::new();
        let reminders = ReminderService::new(repo.clone(), scheduler.clone());
        (IntakeMachine::new(reminders, parser), repo, scheduler)
    }

    async fn utc_machine() -> (IntakeMachine, Repository, SchedulerService) {
        create_test_machine(Arc::new(SimpleTimeParser::new("UTC"))).await
    }

    /// Always answers with the same candidate
    struct FixedParser(RawTime);

    impl TimeParser for FixedParser {
        fn parse(&self, _text: &str, _now: DateTime<Utc>) -> std::result::Result<RawTime, TimeRejection> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_full_conversation_commits() {
        let (machine, repo, scheduler) = utc_machine().await;
        let t = now();

        let reply = machine.start(1, t).await;
        assert_eq!(reply.state, IntakeState::AwaitingTime);

        let reply = machine.handle_text(1, "tomorrow 09:00", t).await.unwrap().unwrap();
        assert_eq!(reply.state, IntakeState::AwaitingMessage);

        let reply = machine.handle_text(1, "  pay rent ", t).await.unwrap().unwrap();
        assert_eq!(reply.state, IntakeState::Committed);

        let reminder = reply.reminder.unwrap();
        assert_eq!(reminder.body, "pay rent");
        let expected_date = (t + Duration::days(1)).date_naive();
        assert_eq!(reminder.fire_at, Utc.from_utc_datetime(&expected_date.and_hms_opt(9, 0, 0).unwrap()));

        assert_eq!(repo.list_reminders_by_owner(1).await.unwrap().len(), 1);
        assert!(scheduler.is_armed(reminder.id).await);
        assert_eq!(machine.state(1).await, None);
    }

    #[tokio::test]
    async fn test_unparseable_times_keep_awaiting_time() {
        let (machine, _repo, _scheduler) = utc_machine().await;
        let t = now();
        machine.start(1, t).await;

        for text in ["whenever", "next blue moon"] {
            let reply = machine.handle_text(1, text, t).await.unwrap().unwrap();
            assert_eq!(reply.state, IntakeState::AwaitingTime);
            assert_eq!(
                reply.rejection,
                Some(TurnRejection::Time(TimeRejection::Unparseable))
            );
            assert_eq!(machine.state(1).await, Some(IntakeState::AwaitingTime));
        }

        let reply = machine.handle_text(1, "in 2h", t).await.unwrap().unwrap();
        assert_eq!(reply.state, IntakeState::AwaitingMessage);
    }

    #[tokio::test]
    async fn test_past_time_is_reprompted() {
        let (machine, _repo, _scheduler) = utc_machine().await;
        let t = now();
        machine.start(1, t).await;

        let reply = machine
            .handle_text(1, "2001-01-01 00:00", t)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.state, IntakeState::AwaitingTime);
        assert_eq!(
            reply.rejection,
            Some(TurnRejection::Time(TimeRejection::PastInstant))
        );
    }

    #[tokio::test]
    async fn test_time_that_passes_before_the_message_is_reprompted() {
        let (machine, repo, scheduler) = utc_machine().await;
        let t = now();
        let earlier = t - Duration::minutes(10);
        machine.start(1, earlier).await;
        let reply = machine.handle_text(1, "in 1m", earlier).await.unwrap().unwrap();
        assert_eq!(reply.state, IntakeState::AwaitingMessage);

        let reply = machine.handle_text(1, "pay rent", t).await.unwrap().unwrap();

        assert_eq!(reply.state, IntakeState::AwaitingTime);
        assert_eq!(
            reply.rejection,
            Some(TurnRejection::Time(TimeRejection::PastInstant))
        );
        assert_eq!(machine.state(1).await, Some(IntakeState::AwaitingTime));
        assert!(repo.list_all_pending().await.unwrap().is_empty());
        assert_eq!(scheduler.armed_count().await, 0);

        // A fresh time gets the conversation going again
        machine.handle_text(1, "in 1h", t).await.unwrap();
        let reply = machine.handle_text(1, "pay rent", t).await.unwrap().unwrap();
        assert_eq!(reply.state, IntakeState::Committed);
        let reminder = reply.reminder.unwrap();
        assert!(reminder.fire_at > reminder.created_at);
    }

    #[tokio::test]
    async fn test_unknown_zone_from_parser_is_reprompted() {
        let local = (now() + Duration::days(1)).naive_utc();
        let parser = Arc::new(FixedParser(RawTime::naive(local, "Nowhere/Special")));
        let (machine, _repo, _scheduler) = create_test_machine(parser).await;
        machine.start(1, now()).await;

        let reply = machine.handle_text(1, "anything", now()).await.unwrap().unwrap();

        assert_eq!(reply.state, IntakeState::AwaitingTime);
        assert!(matches!(
            reply.rejection,
            Some(TurnRejection::Time(TimeRejection::UnknownZone(_)))
        ));
    }

    #[tokio::test]
    async fn test_empty_body_stays_awaiting_message() {
        let (machine, repo, _scheduler) = utc_machine().await;
        let t = now();
        machine.start(1, t).await;
        machine.handle_text(1, "in 1h", t).await.unwrap();

        let reply = machine.handle_text(1, "   ", t).await.unwrap().unwrap();

        assert_eq!(reply.state, IntakeState::AwaitingMessage);
        assert_eq!(reply.rejection, Some(TurnRejection::EmptyBody));
        assert!(repo.list_all_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlong_body_rejected() {
        let (machine, _repo, _scheduler) = utc_machine().await;
        let machine = machine.with_max_body_chars(5);
        let t = now();
        machine.start(1, t).await;
        machine.handle_text(1, "in 1h", t).await.unwrap();

        let reply = machine.handle_text(1, "too long", t).await.unwrap().unwrap();

        assert_eq!(reply.rejection, Some(TurnRejection::BodyTooLong(5)));
        assert_eq!(machine.state(1).await, Some(IntakeState::AwaitingMessage));
    }

    #[tokio::test]
    async fn test_cancel_discards_draft_without_store_writes() {
        let (machine, repo, _scheduler) = utc_machine().await;
        let t = now();
        machine.start(1, t).await;
        machine.handle_text(1, "in 1h", t).await.unwrap();

        assert!(machine.cancel(1).await);
        assert!(!machine.cancel(1).await);
        assert_eq!(machine.state(1).await, None);
        assert!(machine.handle_text(1, "pay rent", t).await.unwrap().is_none());
        assert!(repo.list_all_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_replaces_draft() {
        let (machine, _repo, _scheduler) = utc_machine().await;
        let t = now();
        machine.start(1, t).await;
        machine.handle_text(1, "in 1h", t).await.unwrap();
        assert_eq!(machine.state(1).await, Some(IntakeState::AwaitingMessage));

        machine.start(1, t).await;

        assert_eq!(machine.state(1).await, Some(IntakeState::AwaitingTime));
    }

    #[tokio::test]
    async fn test_drafts_are_per_owner() {
        let (machine, _repo, _scheduler) = utc_machine().await;
        let t = now();
        machine.start(1, t).await;
        machine.start(2, t).await;
        machine.handle_text(1, "in 1h", t).await.unwrap();

        assert_eq!(machine.state(1).await, Some(IntakeState::AwaitingMessage));
        assert_eq!(machine.state(2).await, Some(IntakeState::AwaitingTime));
    }

    #[tokio::test]
    async fn test_expire_drafts_uses_last_turn() {
        let (machine, _repo, _scheduler) = utc_machine().await;
        let t = now();
        machine.start(1, t - Duration::hours(2)).await;
        machine.start(2, t - Duration::hours(2)).await;
        machine.handle_text(2, "in 1h", t).await.unwrap();

        assert_eq!(machine.expire_drafts(t - Duration::minutes(30)).await, 1);
        assert_eq!(machine.state(1).await, None);
        assert_eq!(machine.state(2).await, Some(IntakeState::AwaitingMessage));
    }
}
