mod config;
mod output;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tunnel_eventlog::{
    EventLogError, EventLogPosition, EventManager, EventReader, EventType, FetchEventsRequest,
    FilePositionStore, NamedLogFile, PositionStore, fetch_events, read_log_file,
    storage::scan_directory,
};
use tunnel_logging::TunnelSubscriberBuilder;

use crate::config::{Cli, Command, ReaderConfig};
use crate::output::{StdoutSink, dump_line, file_line, print_line};

struct TailArgs {
    log_id: Option<String>,
    offset: Option<i64>,
    active: bool,
    types: Vec<EventType>,
    resume: bool,
    subscriber_id: Option<String>,
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ReaderConfig::load(cli.config.as_deref())?;
    config.apply(&cli);

    let _guard = TunnelSubscriberBuilder::new()
        .with_config(config.logging.to_log_config())
        .init()?;

    match cli.command {
        Command::Ls => list(&config).await,
        Command::Dump { log } => dump(&config, &log).await,
        Command::Push {
            event_type,
            data,
            timestamp,
        } => push(&config, event_type, &data, timestamp).await,
        Command::Tail {
            log_id,
            offset,
            active,
            types,
            resume,
            subscriber_id,
            limit,
        } => {
            let args = TailArgs {
                log_id,
                offset,
                active,
                types,
                resume,
                subscriber_id,
                limit,
            };
            tail(&config, args).await
        }
    }
}

async fn list(config: &ReaderConfig) -> anyhow::Result<()> {
    let dir = &config.eventlog.directory;
    let files = scan_directory(dir)
        .await
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    let current = files.last().map(|f| f.seq);
    for file in &files {
        let size = tokio::fs::metadata(dir.join(file.to_string()))
            .await
            .ok()
            .map(|m| m.len());
        print_line(&file_line(file, size, Some(file.seq) == current))?;
    }
    Ok(())
}

async fn dump(config: &ReaderConfig, log: &str) -> anyhow::Result<()> {
    let (path, log_id) = resolve_log(&config.eventlog.directory, log).await?;
    let contents = read_log_file(&path, &log_id)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    for event in &contents.events {
        print_line(&dump_line(event))?;
    }

    if let Some(err) = contents.trailing_error {
        warn!(
            path = %path.display(),
            end_offset = contents.end_offset,
            "Log ends with a damaged record"
        );
        anyhow::bail!("{}: {}", path.display(), err);
    }
    Ok(())
}

/// Accept either a path to a log file or the id of a log in `dir`
async fn resolve_log(dir: &Path, log: &str) -> anyhow::Result<(PathBuf, String)> {
    let candidate = Path::new(log);
    if candidate.is_file() {
        let name = candidate
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let log_id = name
            .parse::<NamedLogFile>()
            .map(|f| f.uuid)
            .unwrap_or_else(|_| name.to_string());
        return Ok((candidate.to_path_buf(), log_id));
    }

    let files = scan_directory(dir)
        .await
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    let file = files
        .into_iter()
        .find(|f| f.log_id() == log)
        .with_context(|| format!("No log {} in {}", log, dir.display()))?;
    Ok((dir.join(file.to_string()), file.uuid))
}

async fn push(
    config: &ReaderConfig,
    event_type: EventType,
    data: &str,
    timestamp: i64,
) -> anyhow::Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(data).context("Payload is not valid JSON")?;

    let manager = match EventManager::new(config.eventlog.clone()).await {
        Ok(manager) => manager,
        Err(e @ EventLogError::DirectoryLocked(_)) => {
            return Err(anyhow::Error::new(e)
                .context("The gateway owns this event log; push through the gateway instead"));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to open event log")),
    };
    let pushed = manager.push(event_type, timestamp, &value).await;
    manager.shutdown().await?;
    pushed?;

    info!(event_type = %event_type, "Event pushed");
    Ok(())
}

/// Follow the log read-only, next to whichever process is writing it
async fn tail(config: &ReaderConfig, args: TailArgs) -> anyhow::Result<()> {
    let reader = EventReader::open(config.eventlog.clone())
        .await
        .with_context(|| {
            format!("Failed to open event log in {}", config.eventlog.directory.display())
        })?;

    let cancel = CancellationToken::new();
    let mut sink = StdoutSink::new(cancel.clone()).with_limit(args.limit);
    let mut request = FetchEventsRequest {
        event_types: args.types,
        ..Default::default()
    };

    if let Some(subscriber_id) = args.subscriber_id {
        let store = FilePositionStore::open(config.positions_directory()).await?;
        if args.resume {
            if let Some(position) = store.get(&subscriber_id).await? {
                info!(subscriber_id = %subscriber_id, position = %position, "Resuming");
                request.position = Some(position);
                request.skip_event_at_position = true;
            }
        }
        request.subscriber_id = subscriber_id.clone();
        sink = sink.with_positions(Box::new(store), subscriber_id);
    }

    if args.active {
        request.position = Some(EventLogPosition::start_of(reader.current_log().await?));
    } else if let Some(log_id) = args.log_id {
        request.position = Some(EventLogPosition::new(log_id, args.offset.unwrap_or(0)));
    }

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let streamed = fetch_events(&reader, request, &sink, cancel.clone()).await;
    cancel.cancel();
    reader.shutdown().await?;
    streamed?;

    info!(printed = sink.printed(), "Tail stopped");
    Ok(())
}
