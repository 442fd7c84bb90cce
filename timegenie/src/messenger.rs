//! Outbound message capability
//!
//! The engine never talks to a chat network directly. Whatever transport
//! hosts it implements `Messenger` and classifies its own failures.

use crate::database::OwnerId;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Worth retrying, e.g. a timeout or rate limit
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying will not help, e.g. the chat no longer exists
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, owner_id: OwnerId, text: &str) -> Result<(), SendError>;
}

/// Messenger that prints to stdout, used by the console binary
pub struct ConsoleMessenger {
    stdout: Mutex<Stdout>,
}

impl ConsoleMessenger {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(&self, owner_id: OwnerId, text: &str) -> Result<(), SendError> {
        let mut stdout = self.stdout.lock().await;
        let line = format!("[{}] {}\n", owner_id, text);

        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SendError::Permanent(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))
    }
}
