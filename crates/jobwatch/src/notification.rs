//! Notification entities: one per job, batch, or ad-hoc message.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type NotificationId = String;

/// Artwork shown when a notification carries none of its own.
pub const DEFAULT_ARTWORK: &str = "static/default-artwork.png";

/// Fixed id of the aggregate playlist notification.
pub const BATCH_NOTIFICATION_ID: &str = "playlist-download";

/// Fixed id of the global stream's "reconnecting" notice, so repeated
/// outages never stack duplicates.
pub const RECONNECT_NOTICE_ID: &str = "global-reconnecting";

/// Shown when a job fails without a server-provided reason.
pub const GENERIC_FAILURE: &str = "Download failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Track,
    Album,
    Playlist,
    Error,
    StatusOnly,
}

impl NotificationKind {
    /// True for notifications that mirror a backend job (and can therefore
    /// be cancelled on the backend).
    pub fn is_job(&self) -> bool {
        matches!(
            self,
            NotificationKind::Track | NotificationKind::Album | NotificationKind::Playlist
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "track" => Some(NotificationKind::Track),
            "album" => Some(NotificationKind::Album),
            "playlist" => Some(NotificationKind::Playlist),
            "error" => Some(NotificationKind::Error),
            "status" | "status-only" => Some(NotificationKind::StatusOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DisplayInfo {
    pub title: String,
    pub subtitle: String,
    pub artwork: Option<String>,
}

impl DisplayInfo {
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
            artwork: None,
        }
    }

    pub fn artwork_or_default(&self) -> &str {
        self.artwork.as_deref().unwrap_or(DEFAULT_ARTWORK)
    }
}

/// Lifecycle of a notification.
///
/// ```text
///   Pending -> Active -> Completed | Failed -> Removing -> Removed
///                 \________________________________/
///                      (remove / removeAll / sweep)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    Pending,
    Active,
    Completed,
    Failed,
    Removing,
    Removed,
}

impl NotificationState {
    /// Progress and phase may still change.
    pub fn accepts_updates(&self) -> bool {
        matches!(self, NotificationState::Pending | NotificationState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Success,
    Failure(String),
}

/// A partial change requested of a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    pub progress: Option<u8>,
    pub phase: Option<String>,
    pub outcome: Option<TerminalOutcome>,
}

impl Update {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn phase(phase: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            ..Self::default()
        }
    }

    pub fn outcome(outcome: TerminalOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub display: DisplayInfo,
    /// 0..=100, never decreasing for the lifetime of this entry.
    pub progress: u8,
    /// Last known step, for detail display only.
    pub phase: String,
    pub state: NotificationState,
    /// Cleared when removal starts; the entry lingers until the exit
    /// transition ends.
    pub visible: bool,
    pub created_at: Instant,
    pub completed_at: Option<Instant>,
    pub removing_since: Option<Instant>,
    /// Wall-clock creation time, for display.
    pub created_wall: DateTime<Local>,
    pub(crate) generation: u64,
    pub(crate) timers: CancellationToken,
}

impl Notification {
    pub(crate) fn new(
        id: NotificationId,
        kind: NotificationKind,
        display: DisplayInfo,
        state: NotificationState,
        timers: CancellationToken,
    ) -> Self {
        Self {
            id,
            kind,
            display,
            progress: 0,
            phase: String::new(),
            state,
            visible: true,
            created_at: Instant::now(),
            completed_at: None,
            removing_since: None,
            created_wall: Local::now(),
            generation: 0,
            timers,
        }
    }

    /// The running playlist aggregate, exempt from the sweep's age ceiling.
    pub fn is_running_batch(&self) -> bool {
        self.id == BATCH_NOTIFICATION_ID
            && self.kind == NotificationKind::Playlist
            && self.state.accepts_updates()
    }
}
