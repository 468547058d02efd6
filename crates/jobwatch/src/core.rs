/// Core: single-owner event loop for all notification state.
///
/// Every input (facade commands, normalized channel events, global stream
/// messages, timer expiries, the sweep tick) arrives here and is applied in
/// arrival order.  The core exclusively owns the `ToastController` and the
/// `ChannelManager`; nothing else mutates either.  Observers only see the
/// `NotificationEvent` broadcast.
///
/// After each input the ids that started removal are reaped: their channels
/// are closed, so an update still in flight for a removed job is dropped at
/// the registry check before the connection is physically gone.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jobwatch_proto::config::Config;
use jobwatch_proto::protocol::GlobalMessage;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactRetriever;
use crate::backend::BackendClient;
use crate::channel::{ChannelKind, ChannelManager, GlobalHealth};
use crate::estimator::{estimate, Band, ProgressEvent};
use crate::lifecycle::{LogLevel, NotificationEvent, TimerFired, ToastController, UpdateOutcome};
use crate::notification::{
    DisplayInfo, Notification, NotificationKind, NotificationState, TerminalOutcome, Update,
    BATCH_NOTIFICATION_ID, RECONNECT_NOTICE_ID,
};

const EVENT_QUEUE: usize = 256;
const DISCOVERED_TITLE: &str = "Starting download...";

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the core loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A request from the facade.
    Command(Command),
    /// A normalized event from a job's push stream or poller.
    Job(ProgressEvent),
    /// A message from the global stream.
    Global(GlobalMessage),
    GlobalHealth(GlobalHealth),
    /// A job channel task ended on its own.
    ChannelClosed {
        job_id: String,
        kind: ChannelKind,
        serial: u64,
    },
}

#[derive(Debug)]
pub enum Command {
    Track {
        job_id: String,
        kind: NotificationKind,
        display: DisplayInfo,
    },
    Remove(String),
    RemoveAll,
    /// Remove every job notification (after a bulk cancel).
    RemoveJobs,
    TransitionFinished(String),
    SetArtwork {
        id: String,
        artwork: String,
    },
    NotifyError(String),
    NotifyStatus {
        title: String,
        message: String,
        ttl: Option<Duration>,
    },
    BatchStarted {
        label: String,
        total: u32,
    },
    BatchProgress {
        done: u32,
        total: u32,
        label: Option<String>,
    },
    BatchFinished {
        succeeded: u32,
        failed: u32,
    },
    Snapshot(oneshot::Sender<Vec<Notification>>),
    Shutdown,
}

// ── Core ──────────────────────────────────────────────────────────────────────

/// Per-job estimation state the notification itself does not carry.
#[derive(Debug, Default)]
struct JobTrack {
    band: Band,
    artifact_delivered: bool,
}

pub struct Core {
    toasts: ToastController,
    channels: ChannelManager,
    backend: BackendClient,
    retriever: Arc<dyn ArtifactRetriever>,
    jobs: HashMap<String, JobTrack>,
    config: Config,
}

/// Everything needed to talk to a running core.
pub struct CoreHandle {
    pub tx: mpsc::Sender<CoreEvent>,
    pub events: broadcast::Sender<NotificationEvent>,
    pub task: tokio::task::JoinHandle<()>,
}

impl Core {
    /// Build the core and start its loop on the current runtime.
    pub fn spawn(
        config: Config,
        backend: BackendClient,
        retriever: Arc<dyn ArtifactRetriever>,
    ) -> CoreHandle {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_QUEUE);

        let core = Self {
            toasts: ToastController::new(config.lifecycle.clone(), timer_tx, events.clone()),
            channels: ChannelManager::new(backend.clone(), config.channels.clone(), tx.clone()),
            backend,
            retriever,
            jobs: HashMap::new(),
            config,
        };
        let task = tokio::spawn(core.run(rx, timer_rx));
        CoreHandle { tx, events, task }
    }

    /// Run until `Shutdown` arrives or every sender is gone.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<CoreEvent>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        info!("core: starting event loop");
        self.channels.start_global();

        let mut sweep = tokio::time::interval(self.config.lifecycle.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(CoreEvent::Command(Command::Shutdown)) | None => break,
                    Some(event) => self.handle(event),
                },
                Some(fired) = timers.recv() => self.toasts.on_timer(fired),
                _ = sweep.tick() => self.toasts.sweep(Instant::now()),
            }
            self.reap();
        }

        self.channels.shutdown();
        self.toasts.shutdown();
        info!("core: event loop stopped");
    }

    fn handle(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Command(command) => self.handle_command(command),
            CoreEvent::Job(event) => self.handle_job_event(event),
            CoreEvent::Global(message) => self.handle_global(message),
            CoreEvent::GlobalHealth(health) => self.handle_health(health),
            CoreEvent::ChannelClosed {
                job_id,
                kind,
                serial,
            } => self.channels.on_closed(&job_id, kind, serial),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Track {
                job_id,
                kind,
                display,
            } => self.track(&job_id, kind, display),
            Command::Remove(id) => {
                self.toasts.remove(&id);
            }
            Command::RemoveAll => {
                let removed = self.toasts.remove_all();
                self.channels.untrack_all();
                debug!(removed, "core: removed all notifications");
            }
            Command::RemoveJobs => {
                let removed = self.toasts.remove_jobs();
                info!(removed, "core: removed job notifications after cancel");
            }
            Command::TransitionFinished(id) => self.toasts.transition_finished(&id),
            Command::SetArtwork { id, artwork } => {
                self.toasts.set_artwork(&id, &artwork);
            }
            Command::NotifyError(message) => {
                self.toasts.notify_error(&message);
            }
            Command::NotifyStatus {
                title,
                message,
                ttl,
            } => {
                self.toasts.notify_status(&title, &message, ttl);
            }
            Command::BatchStarted { label, total } => self.batch_started(label, total),
            Command::BatchProgress { done, total, label } => {
                let progress = batch_percent(done, total);
                let update = Update::progress(progress)
                    .with_phase(label.unwrap_or_else(|| format!("{done} of {total} done")));
                self.toasts.apply_update(BATCH_NOTIFICATION_ID, update);
            }
            Command::BatchFinished { succeeded, failed } => {
                let summary = format!("{succeeded} downloaded, {failed} failed");
                let outcome = if succeeded == 0 && failed > 0 {
                    TerminalOutcome::Failure(summary.clone())
                } else {
                    TerminalOutcome::Success
                };
                let level = match outcome {
                    TerminalOutcome::Success => LogLevel::Success,
                    TerminalOutcome::Failure(_) => LogLevel::Error,
                };
                self.toasts.log(level, &format!("Playlist finished: {summary}"));
                self.toasts.apply_update(
                    BATCH_NOTIFICATION_ID,
                    Update::outcome(outcome).with_phase(summary),
                );
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.toasts.registry().snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn track(&mut self, job_id: &str, kind: NotificationKind, display: DisplayInfo) {
        let notification = self.toasts.start_or_get(job_id, kind, display);
        let (kind, state) = (notification.kind, notification.state);
        if !kind.is_job() {
            return;
        }
        if !state.accepts_updates() {
            debug!(job_id, ?state, "core: job already finished, not subscribing");
            return;
        }
        self.jobs.entry(job_id.to_string()).or_default();
        self.channels.track(job_id);
    }

    fn batch_started(&mut self, label: String, total: u32) {
        // A previous batch still on screen is replaced outright.
        if let Some(state) = self
            .toasts
            .registry()
            .get(BATCH_NOTIFICATION_ID)
            .map(|n| n.state)
        {
            if !state.accepts_updates() {
                self.toasts.remove(BATCH_NOTIFICATION_ID);
                self.toasts.transition_finished(BATCH_NOTIFICATION_ID);
            }
        }
        self.toasts.start_or_get(
            BATCH_NOTIFICATION_ID,
            NotificationKind::Playlist,
            DisplayInfo::new(label, format!("{total} tracks")),
        );
        self.toasts.apply_update(
            BATCH_NOTIFICATION_ID,
            Update::phase(format!("0 of {total} done")),
        );
    }

    fn handle_job_event(&mut self, event: ProgressEvent) {
        let id = event.job_id.clone();
        let Some((progress, state, title)) = self
            .toasts
            .registry()
            .get(&id)
            .map(|n| (n.progress, n.state, n.display.title.clone()))
        else {
            debug!(job_id = %id, "core: event for untracked job dropped");
            return;
        };
        if matches!(
            state,
            NotificationState::Removing | NotificationState::Removed
        ) {
            debug!(job_id = %id, "core: event for removed job dropped");
            return;
        }
        debug!(job_id = %id, source = ?event.source, kind = ?event.kind, "core: job event");

        let track = self.jobs.entry(id.clone()).or_default();
        let est = estimate(progress, track.band, &event);
        track.band = est.band;

        if let Some(warning) = &est.warning {
            self.toasts.notify_warning(&id, warning);
        }

        // First success with files wins; a job already shown as failed
        // never hands anything off.
        let files = event.delivered_files();
        if let Some(file) = files.and_then(|f| f.first()) {
            if !track.artifact_delivered && state != NotificationState::Failed {
                track.artifact_delivered = true;
                let url = self.backend.artifact_url(&file.filename);
                info!(job_id = %id, filename = %file.filename, "core: handing off artifact");
                self.retriever.retrieve(&id, file, &url);
            }
        }

        let failure = match &est.outcome {
            Some(TerminalOutcome::Failure(reason)) => Some(reason.clone()),
            _ => None,
        };
        let update = Update {
            progress: est.progress,
            phase: est.phase,
            outcome: est.outcome,
        };
        let applied = self.toasts.apply_update(&id, update);

        if let (UpdateOutcome::Finalized, Some(reason)) = (applied, &failure) {
            self.toasts.log(LogLevel::Error, &format!("{title}: {reason}"));
        } else if applied == UpdateOutcome::Finalized {
            self.toasts.log(LogLevel::Success, &format!("{title}: done"));
        }

        // A success without files keeps the poller alive to resolve them.
        if failure.is_some() || files.is_some() {
            self.channels.untrack(&id);
        }
    }

    fn handle_global(&mut self, message: GlobalMessage) {
        match message {
            GlobalMessage::Info { message, track_id } => {
                if !message.is_empty() {
                    self.toasts.log(LogLevel::Info, &message);
                }
                if let Some(job_id) = track_id {
                    if !self.toasts.registry().contains(&job_id) {
                        info!(%job_id, "core: discovered job from global stream");
                        self.track(
                            &job_id,
                            NotificationKind::Track,
                            DisplayInfo::new(DISCOVERED_TITLE, message),
                        );
                    }
                }
            }
            GlobalMessage::Success { message } => self.toasts.log(LogLevel::Success, &message),
            GlobalMessage::Error { message } => self.toasts.log(LogLevel::Error, &message),
            GlobalMessage::Heartbeat => {}
            GlobalMessage::Unknown => warn!("core: unknown global message type ignored"),
        }
    }

    fn handle_health(&mut self, health: GlobalHealth) {
        match health {
            GlobalHealth::Connected => {
                self.toasts.remove(RECONNECT_NOTICE_ID);
            }
            GlobalHealth::Lost { failures } => {
                if failures < self.config.channels.reconnect_notice_after {
                    return;
                }
                let ttl = self.config.lifecycle.status_notice();
                self.toasts.notify(
                    Some(RECONNECT_NOTICE_ID),
                    NotificationKind::StatusOnly,
                    DisplayInfo::new("Reconnecting", "Lost connection to the server, retrying"),
                    ttl,
                );
            }
        }
    }

    fn reap(&mut self) {
        for id in self.toasts.drain_retired() {
            self.channels.untrack(&id);
            self.jobs.remove(&id);
        }
    }
}

/// Batch percentage; stays below 100 until the batch is finished.
fn batch_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u64::from(done.min(total)) * 100 / u64::from(total);
    pct.min(99) as u8
}
