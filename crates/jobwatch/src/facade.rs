//! The one entry point for surrounding code: start tracking a job, submit or
//! cancel jobs, drive the batch notification, and observe notification events.

use std::sync::Arc;
use std::time::Duration;

use jobwatch_proto::config::Config;
use jobwatch_proto::protocol::JobRequest;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::artifact::ArtifactRetriever;
use crate::backend::BackendClient;
use crate::core::{Command, Core, CoreEvent};
use crate::error::{Error, Result};
use crate::lifecycle::NotificationEvent;
use crate::notification::{DisplayInfo, Notification, NotificationKind};

/// What to submit, and how its notification should look.
#[derive(Debug, Clone)]
pub struct Submission {
    pub kind: NotificationKind,
    pub query: Option<String>,
    pub item: Option<serde_json::Value>,
    pub display: DisplayInfo,
}

#[derive(Clone)]
pub struct NotificationFacade {
    tx: mpsc::Sender<CoreEvent>,
    events: broadcast::Sender<NotificationEvent>,
    backend: BackendClient,
}

impl NotificationFacade {
    /// Start the engine on the current runtime.
    pub fn spawn(config: Config, retriever: Arc<dyn ArtifactRetriever>) -> Result<Self> {
        let backend = BackendClient::new(&config.backend)?;
        info!(base_url = %backend.base_url(), "starting notification engine");
        let handle = Core::spawn(config, backend.clone(), retriever);
        Ok(Self {
            tx: handle.tx,
            events: handle.events,
            backend,
        })
    }

    /// Receive every notification event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    /// Begin monitoring `job_id`.  Tracking an id twice is harmless.
    pub async fn track(
        &self,
        job_id: &str,
        kind: NotificationKind,
        display: DisplayInfo,
    ) -> Result<()> {
        if job_id.trim().is_empty() {
            return self.reject("No job id to track").await;
        }
        if !kind.is_job() {
            return self.reject("Only download jobs can be tracked").await;
        }
        self.send(Command::Track {
            job_id: job_id.to_string(),
            kind,
            display,
        })
        .await
    }

    /// Submit a job to `service` and track it.  Returns the new job id.
    pub async fn submit(&self, service: Option<&str>, submission: Submission) -> Result<String> {
        let Some(service) = service.filter(|s| !s.is_empty()) else {
            return self.reject("Please select a service first").await;
        };
        let kind = match submission.kind {
            NotificationKind::Track => "track",
            NotificationKind::Album => "album",
            NotificationKind::Playlist => "playlist",
            NotificationKind::Error | NotificationKind::StatusOnly => {
                return self.reject("Only download jobs can be submitted").await;
            }
        };

        let request = JobRequest {
            service: service.to_string(),
            kind: kind.to_string(),
            query: submission.query,
            item: submission.item,
        };
        let job_id = match self.backend.submit(&request).await {
            Ok(id) => id,
            Err(e) => {
                warn!("job submission failed: {e}");
                self.notify_error(&format!("Download failed to start: {e}")).await?;
                return Err(e);
            }
        };
        info!(%job_id, service, kind, "job submitted");
        self.track(&job_id, submission.kind, submission.display).await?;
        Ok(job_id)
    }

    /// Ask the backend to cancel everything.  Once it answers, every job
    /// notification is removed regardless of its state.
    pub async fn cancel_all(&self) -> Result<bool> {
        match self.backend.cancel_all().await {
            Ok(reply) => {
                self.send(Command::RemoveJobs).await?;
                if !reply.success {
                    self.notify_error("Server could not cancel all downloads").await?;
                }
                Ok(reply.success)
            }
            Err(e @ (Error::Status(_) | Error::Malformed(_))) => {
                self.send(Command::RemoveJobs).await?;
                self.notify_error(&format!("Cancel request failed: {e}")).await?;
                Err(e)
            }
            Err(e) => {
                self.notify_error(&format!("Cancel request failed: {e}")).await?;
                Err(e)
            }
        }
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.send(Command::Remove(id.to_string())).await
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.send(Command::RemoveAll).await
    }

    /// The exit transition of `id` has finished rendering.
    pub async fn transition_finished(&self, id: &str) -> Result<()> {
        self.send(Command::TransitionFinished(id.to_string())).await
    }

    pub async fn set_artwork(&self, id: &str, artwork: &str) -> Result<()> {
        self.send(Command::SetArtwork {
            id: id.to_string(),
            artwork: artwork.to_string(),
        })
        .await
    }

    pub async fn notify_error(&self, message: &str) -> Result<()> {
        self.send(Command::NotifyError(message.to_string())).await
    }

    /// Show a status-only notice for `ttl`, or the configured default.
    pub async fn notify_status(
        &self,
        title: &str,
        message: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.send(Command::NotifyStatus {
            title: title.to_string(),
            message: message.to_string(),
            ttl,
        })
        .await
    }

    pub async fn batch_started(&self, label: &str, total: u32) -> Result<()> {
        self.send(Command::BatchStarted {
            label: label.to_string(),
            total,
        })
        .await
    }

    pub async fn batch_progress(&self, done: u32, total: u32, label: Option<&str>) -> Result<()> {
        self.send(Command::BatchProgress {
            done,
            total,
            label: label.map(str::to_string),
        })
        .await
    }

    pub async fn batch_finished(&self, succeeded: u32, failed: u32) -> Result<()> {
        self.send(Command::BatchFinished { succeeded, failed }).await
    }

    /// Current notifications, oldest first.
    pub async fn snapshot(&self) -> Result<Vec<Notification>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    async fn reject<T>(&self, reason: &'static str) -> Result<T> {
        warn!("rejected: {reason}");
        self.notify_error(reason).await?;
        Err(Error::Precondition(reason))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(CoreEvent::Command(command))
            .await
            .map_err(|_| Error::Closed)
    }
}
