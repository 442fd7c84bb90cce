//! Services module
//!
//! Business logic that coordinates the store, the timer set and the
//! outbound messenger.

pub mod delivery;
pub mod intake;
pub mod reminders;
pub mod scheduler;
pub mod sweeper;

pub use delivery::{DeliveryDispatcher, DeliveryOutcome, DispatcherHandle};
pub use intake::{IntakeMachine, IntakeState, TurnRejection, TurnReply};
pub use reminders::ReminderService;
pub use scheduler::{FiredReceiver, SchedulerService};
pub use sweeper::DraftSweeper;
