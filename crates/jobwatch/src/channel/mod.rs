/// ChannelManager: owns every live connection to the backend.
///
/// One global status stream, plus for each tracked job a push stream and a
/// poller running side by side.  Each connection is a spawned task holding a
/// child of the manager's root cancellation token; the subscription table
/// keys them by job id so a job never has two of either.
///
/// Tasks report what they read as `CoreEvent`s and announce their own end
/// with `CoreEvent::ChannelClosed`, tagged with the serial they were started
/// under so a late close from a superseded task cannot unregister its
/// replacement.
use std::collections::HashMap;

use jobwatch_proto::config::ChannelsConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::BackendClient;
use crate::core::CoreEvent;

pub mod global;
pub mod normalize;
mod poll;
mod push;
pub mod sse;

pub use global::GlobalHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Push,
    Poll,
}

#[derive(Debug)]
struct ChannelHandle {
    cancel: CancellationToken,
    serial: u64,
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Default)]
struct Subscription {
    push: Option<ChannelHandle>,
    poll: Option<ChannelHandle>,
}

impl Subscription {
    fn slot(&mut self, kind: ChannelKind) -> &mut Option<ChannelHandle> {
        match kind {
            ChannelKind::Push => &mut self.push,
            ChannelKind::Poll => &mut self.poll,
        }
    }

    fn is_idle(&self) -> bool {
        self.push.is_none() && self.poll.is_none()
    }
}

pub struct ChannelManager {
    backend: BackendClient,
    config: ChannelsConfig,
    events: mpsc::Sender<CoreEvent>,
    subscriptions: HashMap<String, Subscription>,
    global: Option<CancellationToken>,
    root: CancellationToken,
    next_serial: u64,
}

impl ChannelManager {
    pub fn new(
        backend: BackendClient,
        config: ChannelsConfig,
        events: mpsc::Sender<CoreEvent>,
    ) -> Self {
        Self {
            backend,
            config,
            events,
            subscriptions: HashMap::new(),
            global: None,
            root: CancellationToken::new(),
            next_serial: 0,
        }
    }

    pub fn start_global(&mut self) {
        if self.global.is_some() {
            return;
        }
        let cancel = self.root.child_token();
        self.global = Some(cancel.clone());
        info!("channels: starting global stream");
        tokio::spawn(global::run(
            self.backend.clone(),
            self.config.global_reconnect(),
            self.events.clone(),
            cancel,
        ));
    }

    /// Open the push stream and the poller for `job_id`.  Returns false when
    /// the job already has a subscription.
    pub fn track(&mut self, job_id: &str) -> bool {
        if self.subscriptions.contains_key(job_id) {
            debug!(job_id, "channels: already subscribed");
            return false;
        }

        let push = self.handle();
        tokio::spawn(push::run(
            self.backend.clone(),
            job_id.to_string(),
            push.serial,
            self.events.clone(),
            push.cancel.clone(),
        ));
        let poll = self.handle();
        tokio::spawn(poll::run(
            self.backend.clone(),
            job_id.to_string(),
            poll.serial,
            self.config.poll_interval(),
            self.events.clone(),
            poll.cancel.clone(),
        ));

        debug!(job_id, "channels: subscribed");
        self.subscriptions.insert(
            job_id.to_string(),
            Subscription {
                push: Some(push),
                poll: Some(poll),
            },
        );
        true
    }

    /// A channel task ended on its own.
    pub fn on_closed(&mut self, job_id: &str, kind: ChannelKind, serial: u64) {
        let Some(sub) = self.subscriptions.get_mut(job_id) else {
            return;
        };
        let slot = sub.slot(kind);
        if slot.as_ref().is_some_and(|h| h.serial == serial) {
            *slot = None;
            debug!(job_id, ?kind, "channels: channel closed");
        }
        if sub.is_idle() {
            self.subscriptions.remove(job_id);
        }
    }

    /// Close every channel of `job_id`.
    pub fn untrack(&mut self, job_id: &str) {
        if self.subscriptions.remove(job_id).is_some() {
            debug!(job_id, "channels: unsubscribed");
        }
    }

    pub fn untrack_all(&mut self) {
        self.subscriptions.clear();
    }

    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.subscriptions.contains_key(job_id)
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.subscriptions
            .get(job_id)
            .is_some_and(|s| s.poll.is_some())
    }

    pub fn tracked_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn shutdown(&mut self) {
        self.subscriptions.clear();
        self.global = None;
        self.root.cancel();
    }

    fn handle(&mut self) -> ChannelHandle {
        self.next_serial += 1;
        ChannelHandle {
            cancel: self.root.child_token(),
            serial: self.next_serial,
        }
    }
}
