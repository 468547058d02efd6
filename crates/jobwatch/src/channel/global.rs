//! The long-lived global status stream.  Reconnects after a fixed delay on
//! any error or server-side close, until cancelled.

use std::time::Duration;

use jobwatch_proto::protocol::GlobalMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sse::SseStream;
use crate::backend::BackendClient;
use crate::core::CoreEvent;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalHealth {
    Connected,
    /// Consecutive failed or dropped sessions since the last good connect.
    Lost { failures: u32 },
}

pub(crate) async fn run(
    backend: BackendClient,
    reconnect: Duration,
    events: mpsc::Sender<CoreEvent>,
    cancel: CancellationToken,
) {
    let mut failures = 0u32;
    loop {
        let ended = tokio::select! {
            _ = cancel.cancelled() => return,
            r = session(&backend, &events, &mut failures) => r,
        };
        match ended {
            Ok(()) => info!("global stream closed by server"),
            Err(Error::Closed) => return,
            Err(e) => warn!("global stream error: {e}"),
        }

        failures = failures.saturating_add(1);
        if events
            .send(CoreEvent::GlobalHealth(GlobalHealth::Lost { failures }))
            .await
            .is_err()
        {
            return;
        }
        debug!(?reconnect, failures, "global stream reconnecting");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect) => {}
        }
    }
}

async fn session(
    backend: &BackendClient,
    events: &mpsc::Sender<CoreEvent>,
    failures: &mut u32,
) -> Result<()> {
    let response = backend.open_status_stream().await?;
    info!("global stream connected");
    *failures = 0;
    events
        .send(CoreEvent::GlobalHealth(GlobalHealth::Connected))
        .await
        .map_err(|_| Error::Closed)?;

    let mut frames = SseStream::new(Box::pin(response.bytes_stream()));
    while let Some(frame) = frames.next_frame().await {
        let frame = frame?;
        match serde_json::from_str::<GlobalMessage>(&frame.data) {
            Ok(message) => events
                .send(CoreEvent::Global(message))
                .await
                .map_err(|_| Error::Closed)?,
            Err(e) => warn!("malformed global message skipped: {e}"),
        }
    }
    Ok(())
}
