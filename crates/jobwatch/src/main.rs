use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwatch::{
    DisplayInfo, LogRetriever, NotificationEvent, NotificationFacade, NotificationKind, Submission,
};
use jobwatch_proto::config::Config;
use jobwatch_proto::platform;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "jobwatch", about = "Follow download jobs and print their notifications")]
struct Cli {
    /// Config file (default: config.toml in the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the backend base URL from the config
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Track existing jobs until their notifications are gone
    Watch {
        #[arg(required = true)]
        job_ids: Vec<String>,

        #[arg(long, default_value = "track", value_parser = ["track", "album", "playlist"])]
        kind: String,
    },
    /// Submit a job and follow it
    Submit {
        #[arg(long)]
        service: String,

        #[arg(long)]
        query: String,

        #[arg(long, default_value = "track", value_parser = ["track", "album", "playlist"])]
        kind: String,
    },
    /// Ask the backend to cancel every job
    CancelAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("jobwatch.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("jobwatch log: {}", log_path.display());
    tracing::info!("jobwatch starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().unwrap_or_default(),
    };
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url;
    }

    // ── Start engine ─────────────────────────────────────────────────────────
    let facade = NotificationFacade::spawn(config, Arc::new(LogRetriever))
        .context("failed to start notification engine")?;
    let events = facade.subscribe();

    match cli.command {
        Cmd::Watch { job_ids, kind } => {
            let kind = NotificationKind::parse(&kind).unwrap_or(NotificationKind::Track);
            for job_id in &job_ids {
                facade
                    .track(job_id, kind, DisplayInfo::new(job_id.clone(), ""))
                    .await?;
            }
            follow(&facade, events, job_ids.into_iter().collect()).await;
        }
        Cmd::Submit {
            service,
            query,
            kind,
        } => {
            let kind = NotificationKind::parse(&kind).unwrap_or(NotificationKind::Track);
            let submission = Submission {
                kind,
                query: Some(query.clone()),
                item: None,
                display: DisplayInfo::new(query, service.clone()),
            };
            let job_id = facade.submit(Some(&service), submission).await?;
            println!("submitted job {job_id}");
            follow(&facade, events, HashSet::from([job_id])).await;
        }
        Cmd::CancelAll => {
            if facade.cancel_all().await? {
                println!("all downloads cancelled");
            } else {
                println!("backend did not cancel every download");
            }
        }
    }

    let _ = facade.shutdown().await;
    tracing::info!("jobwatch exiting");
    Ok(())
}

/// Print notification events until every job in `pending` is gone.  There is
/// no exit animation here, so removals are confirmed immediately.
async fn follow(
    facade: &NotificationFacade,
    mut events: broadcast::Receiver<NotificationEvent>,
    mut pending: HashSet<String>,
) {
    while !pending.is_empty() {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            NotificationEvent::Created(n) => {
                println!(
                    "[{}] + {} {} {}",
                    n.created_wall.format("%H:%M:%S"),
                    n.id,
                    n.display.title,
                    n.display.subtitle
                );
            }
            NotificationEvent::Updated(n) => {
                println!("    {} {:?} {:>3}% {}", n.id, n.state, n.progress, n.phase);
            }
            NotificationEvent::Removing(id) => {
                let _ = facade.transition_finished(&id).await;
            }
            NotificationEvent::Removed(id) => {
                println!("    - {id}");
                pending.remove(&id);
            }
            NotificationEvent::Log(entry) => {
                println!(
                    "[{}] {:?}: {}",
                    entry.at.format("%H:%M:%S"),
                    entry.level,
                    entry.message
                );
            }
        }
    }
}
