// TimeGenie - Reminder scheduling engine
// Entry point: console transport around the engine

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use timegenie::app::App;
use timegenie::config::EngineConfig;
use timegenie::messenger::{ConsoleMessenger, Messenger};
use timegenie::time::SimpleTimeParser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timegenie=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting TimeGenie");

    let config_path = std::env::var("TIMEGENIE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("timegenie.json"));

    let mut config = EngineConfig::load(&config_path)
        .await
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    if let Ok(db_path) = std::env::var("TIMEGENIE_DB") {
        config.database_path = PathBuf::from(db_path);
    }

    let messenger: Arc<dyn Messenger> = Arc::new(ConsoleMessenger::new());
    let parser = Arc::new(SimpleTimeParser::new(config.timezone.clone()));

    let app = App::start(&config, Arc::clone(&messenger), parser)
        .await
        .context("starting reminder engine")?;

    tracing::info!("Ready. Type `<chat id> <message>`, e.g. `1 /remind`");

    run_console(&app, messenger.as_ref(), BufReader::new(tokio::io::stdin())).await;

    app.shutdown().await?;
    Ok(())
}

/// Feed `<chat id> <message>` lines to the engine until EOF, a read error
/// or Ctrl-C. Replies go out through `messenger`.
async fn run_console<R>(app: &App, messenger: &dyn Messenger, input: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        // e.g. invalid UTF-8; stop reading but still shut down cleanly
                        tracing::error!("Failed to read input: {}", e);
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let Some((owner, text)) = line
                    .split_once(char::is_whitespace)
                    .and_then(|(owner, text)| owner.parse::<i64>().ok().map(|owner| (owner, text)))
                else {
                    eprintln!("expected `<chat id> <message>`");
                    continue;
                };

                match app.handle_message(owner, text).await {
                    Ok(reply) => {
                        if let Err(e) = messenger.send(owner, &reply).await {
                            tracing::error!("Failed to send reply to {}: {}", owner, e);
                        }
                    }
                    Err(e) => tracing::error!("Error handling message from {}: {}", owner, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_error_ends_console_without_skipping_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            database_path: temp_dir.path().join("reminders.db"),
            ..EngineConfig::default()
        };
        let messenger = ConsoleMessenger::new();
        let app = App::start(
            &config,
            Arc::new(ConsoleMessenger::new()),
            Arc::new(SimpleTimeParser::new("UTC")),
        )
        .await
        .unwrap();

        let input: &[u8] = b"1 /remind in 1h, water the plants\n\xff\xfe\n1 /remind in 2h, unread\n";
        run_console(&app, &messenger, input).await;

        let reminders = app.state().reminders.list_reminders(1).await.unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].body, "water the plants");

        app.shutdown().await.unwrap();
    }
}
