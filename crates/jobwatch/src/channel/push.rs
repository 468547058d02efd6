//! Per-job push stream.  Closes on the first terminal event or on any error
//! and is never retried; the poller covers the gap.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use jobwatch_proto::protocol::JobStreamMessage;

use super::normalize::normalize_job_message;
use super::sse::SseStream;
use super::ChannelKind;
use crate::backend::BackendClient;
use crate::core::CoreEvent;
use crate::error::{Error, Result};

pub(crate) async fn run(
    backend: BackendClient,
    job_id: String,
    serial: u64,
    events: mpsc::Sender<CoreEvent>,
    cancel: CancellationToken,
) {
    let ended = tokio::select! {
        _ = cancel.cancelled() => return,
        r = read(&backend, &job_id, &events) => r,
    };
    match ended {
        Ok(()) => debug!(%job_id, "job stream finished"),
        Err(Error::Closed) => return,
        Err(e) => warn!(%job_id, "job stream dropped: {e}"),
    }
    let _ = events
        .send(CoreEvent::ChannelClosed {
            job_id,
            kind: ChannelKind::Push,
            serial,
        })
        .await;
}

async fn read(
    backend: &BackendClient,
    job_id: &str,
    events: &mpsc::Sender<CoreEvent>,
) -> Result<()> {
    let response = backend.open_job_stream(job_id).await?;
    let mut frames = SseStream::new(Box::pin(response.bytes_stream()));
    while let Some(frame) = frames.next_frame().await {
        let frame = frame?;
        let message: JobStreamMessage = match serde_json::from_str(&frame.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(job_id, "malformed job message skipped: {e}");
                continue;
            }
        };
        let Some(event) = normalize_job_message(job_id, message) else {
            debug!(job_id, data = %frame.data, "unhandled job message ignored");
            continue;
        };
        let terminal = event.is_terminal();
        events
            .send(CoreEvent::Job(event))
            .await
            .map_err(|_| Error::Closed)?;
        if terminal {
            break;
        }
    }
    Ok(())
}
