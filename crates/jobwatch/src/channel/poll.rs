//! Fixed-interval status polling.  Errors are retried on the next tick; the
//! task ends once the backend reports a terminal status.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::normalize::normalize_poll;
use super::ChannelKind;
use crate::backend::BackendClient;
use crate::core::CoreEvent;

pub(crate) async fn run(
    backend: BackendClient,
    job_id: String,
    serial: u64,
    interval: Duration,
    events: mpsc::Sender<CoreEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            r = backend.poll(&job_id) => r,
        };
        let status = match polled {
            Ok(status) => status,
            Err(e) => {
                debug!(%job_id, "poll failed, retrying next tick: {e}");
                continue;
            }
        };
        let terminal = status.status.is_terminal();
        if events
            .send(CoreEvent::Job(normalize_poll(&job_id, status)))
            .await
            .is_err()
        {
            return;
        }
        if terminal {
            break;
        }
    }

    debug!(%job_id, "poller finished");
    let _ = events
        .send(CoreEvent::ChannelClosed {
            job_id,
            kind: ChannelKind::Poll,
            serial,
        })
        .await;
}
