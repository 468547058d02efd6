/// ToastController: owns every notification and all of its timers.
///
/// Timers never touch state themselves.  Each one is a spawned sleep that,
/// unless its entry's cancellation token fires first, sends a `TimerFired`
/// back to the owning loop; the loop hands it to [`ToastController::on_timer`],
/// which drops it when the entry it was scheduled for has since been replaced
/// (generation mismatch) or already moved on.
///
/// Removal is two-phase: `remove` hides the entry and emits `Removing`, the
/// presentation layer answers with `transition_finished` when its exit
/// animation ends, and a fallback timer finalizes the entry regardless so
/// nothing lingers in `Removing` beyond `removal_fallback`.
use std::time::Duration;

use chrono::{DateTime, Local};
use jobwatch_proto::config::LifecycleConfig;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notification::{
    DisplayInfo, Notification, NotificationId, NotificationKind, NotificationState,
    TerminalOutcome, Update,
};
use crate::registry::NotificationRegistry;

// ── Timers ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Finished entry has been on screen long enough; start removal.
    Decay,
    /// Exit transition never confirmed; drop the entry.
    RemovalFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub id: NotificationId,
    pub generation: u64,
    pub kind: TimerKind,
}

// ── Outbound events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One line for the presentation layer's activity log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

/// What the presentation layer observes.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Created(Notification),
    Updated(Notification),
    /// Start the exit transition and call back `transition_finished`.
    Removing(NotificationId),
    Removed(NotificationId),
    Log(LogEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Unknown id, or the entry no longer accepts updates.
    Ignored,
    Applied,
    /// The update carried a terminal outcome; the entry is now frozen.
    Finalized,
}

// ── ToastController ───────────────────────────────────────────────────────────

pub struct ToastController {
    registry: NotificationRegistry,
    config: LifecycleConfig,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    events: broadcast::Sender<NotificationEvent>,
    /// Parent of every per-entry timer token.
    root: CancellationToken,
    /// Ids that entered `Removing` since the last `drain_retired`.
    retired: Vec<NotificationId>,
    notice_seq: u64,
}

impl ToastController {
    pub fn new(
        config: LifecycleConfig,
        timer_tx: mpsc::UnboundedSender<TimerFired>,
        events: broadcast::Sender<NotificationEvent>,
    ) -> Self {
        Self {
            registry: NotificationRegistry::new(),
            config,
            timer_tx,
            events,
            root: CancellationToken::new(),
            retired: Vec::new(),
            notice_seq: 0,
        }
    }

    pub fn registry(&self) -> &NotificationRegistry {
        &self.registry
    }

    /// Return the entry for `id`, creating it when absent.
    ///
    /// An existing entry is returned untouched: a second start for the same
    /// job never resets its progress or display info.  Job kinds start
    /// `Pending`; ad-hoc notices start `Active`.
    pub fn start_or_get(
        &mut self,
        id: &str,
        kind: NotificationKind,
        display: DisplayInfo,
    ) -> &Notification {
        let state = if kind.is_job() {
            NotificationState::Pending
        } else {
            NotificationState::Active
        };
        let token = self.root.child_token();
        let (notification, created) = self.registry.get_or_insert_with(id, || {
            Notification::new(id.to_string(), kind, display, state, token)
        });
        if created {
            debug!(id, ?kind, "notification created");
            let _ = self.events.send(NotificationEvent::Created(notification.clone()));
        } else {
            debug!(id, state = ?notification.state, "start for existing notification");
        }
        notification
    }

    /// Apply a progress/phase/outcome update.
    ///
    /// Progress only moves forward and is capped at 100; reaching 100 counts
    /// as success.  Once an outcome has been applied the entry is frozen and
    /// every later update is ignored.
    pub fn apply_update(&mut self, id: &str, update: Update) -> UpdateOutcome {
        let Some(notification) = self.registry.get_mut(id) else {
            debug!(id, "update for unknown notification dropped");
            return UpdateOutcome::Ignored;
        };
        if !notification.state.accepts_updates() {
            debug!(id, state = ?notification.state, "update after finish dropped");
            return UpdateOutcome::Ignored;
        }

        let mut changed = false;
        if notification.state == NotificationState::Pending {
            notification.state = NotificationState::Active;
            changed = true;
        }
        if let Some(progress) = update.progress.map(|p| p.min(100)) {
            if progress > notification.progress {
                notification.progress = progress;
                changed = true;
            }
        }
        if let Some(phase) = update.phase.filter(|p| !p.is_empty()) {
            if notification.phase != phase {
                notification.phase = phase;
                changed = true;
            }
        }

        let outcome = match update.outcome {
            Some(outcome) => Some(outcome),
            None if notification.progress >= 100 => Some(TerminalOutcome::Success),
            None => None,
        };
        let decay = match outcome {
            None => {
                if changed {
                    let _ = self
                        .events
                        .send(NotificationEvent::Updated(notification.clone()));
                }
                return UpdateOutcome::Applied;
            }
            Some(TerminalOutcome::Success) => {
                notification.progress = 100;
                notification.state = NotificationState::Completed;
                info!(id, "notification completed");
                self.config.success_decay()
            }
            Some(TerminalOutcome::Failure(reason)) => {
                warn!(id, %reason, "notification failed");
                notification.state = NotificationState::Failed;
                notification.phase = reason;
                self.config.failure_decay()
            }
        };
        notification.completed_at = Some(Instant::now());
        let _ = self
            .events
            .send(NotificationEvent::Updated(notification.clone()));
        self.schedule(id, TimerKind::Decay, decay);
        UpdateOutcome::Finalized
    }

    pub fn set_artwork(&mut self, id: &str, artwork: &str) -> bool {
        let Some(notification) = self.registry.get_mut(id) else {
            return false;
        };
        if matches!(
            notification.state,
            NotificationState::Removing | NotificationState::Removed
        ) {
            return false;
        }
        notification.display.artwork = (!artwork.is_empty()).then(|| artwork.to_string());
        let _ = self
            .events
            .send(NotificationEvent::Updated(notification.clone()));
        true
    }

    /// Start removing `id`.  Returns false when it is unknown or already
    /// on its way out, so repeated calls are harmless.
    pub fn remove(&mut self, id: &str) -> bool {
        let fallback = self.config.removal_fallback();
        let Some(notification) = self.registry.get_mut(id) else {
            return false;
        };
        if matches!(
            notification.state,
            NotificationState::Removing | NotificationState::Removed
        ) {
            return false;
        }

        debug!(id, from = ?notification.state, "notification removing");
        notification.state = NotificationState::Removing;
        notification.visible = false;
        notification.removing_since = Some(Instant::now());
        // Pending decay timers die with the old token.
        notification.timers.cancel();
        notification.timers = self.root.child_token();

        self.retired.push(id.to_string());
        let _ = self.events.send(NotificationEvent::Removing(id.to_string()));
        self.schedule(id, TimerKind::RemovalFallback, fallback);
        true
    }

    pub fn remove_all(&mut self) -> usize {
        self.remove_where(|_| true)
    }

    /// Remove every notification that mirrors a backend job.
    pub fn remove_jobs(&mut self) -> usize {
        self.remove_where(|n| n.kind.is_job())
    }

    fn remove_where(&mut self, pred: impl Fn(&Notification) -> bool) -> usize {
        let ids: Vec<NotificationId> = self
            .registry
            .iter()
            .filter(|n| pred(n))
            .map(|n| n.id.clone())
            .collect();
        ids.iter().filter(|id| self.remove(id)).count()
    }

    /// The exit transition for `id` has ended.
    pub fn transition_finished(&mut self, id: &str) {
        match self.registry.get(id).map(|n| n.state) {
            Some(NotificationState::Removing) => self.finalize(id),
            Some(state) => debug!(id, ?state, "transition end for visible notification ignored"),
            None => {}
        }
    }

    pub fn on_timer(&mut self, fired: TimerFired) {
        let Some((generation, state)) = self
            .registry
            .get(&fired.id)
            .map(|n| (n.generation, n.state))
        else {
            return;
        };
        if generation != fired.generation {
            debug!(id = %fired.id, "stale timer dropped");
            return;
        }
        match fired.kind {
            TimerKind::Decay => {
                self.remove(&fired.id);
            }
            TimerKind::RemovalFallback if state == NotificationState::Removing => {
                debug!(id = %fired.id, "exit transition not confirmed, finalizing");
                self.finalize(&fired.id);
            }
            TimerKind::RemovalFallback => {}
        }
    }

    /// Periodic cleanup: entries completed longer than the grace period,
    /// entries older than the age ceiling (a running batch excepted), and
    /// entries stuck in `Removing`.
    pub fn sweep(&mut self, now: Instant) {
        let grace = self.config.completed_grace();
        let max_age = self.config.max_age();
        let fallback = self.config.removal_fallback();

        let mut expired = Vec::new();
        let mut stuck = Vec::new();
        for n in self.registry.iter() {
            match n.state {
                NotificationState::Removing => {
                    if n
                        .removing_since
                        .is_some_and(|t| now.saturating_duration_since(t) >= fallback)
                    {
                        stuck.push(n.id.clone());
                    }
                }
                NotificationState::Removed => stuck.push(n.id.clone()),
                _ => {
                    // Failures are left to their own, longer decay.
                    let lingering = n.state == NotificationState::Completed
                        && n.completed_at
                            .is_some_and(|t| now.saturating_duration_since(t) > grace);
                    let too_old = now.saturating_duration_since(n.created_at) > max_age
                        && !n.is_running_batch();
                    if lingering || too_old {
                        expired.push(n.id.clone());
                    }
                }
            }
        }

        for id in stuck {
            warn!(%id, "sweep: finalizing notification stuck in removal");
            self.finalize(&id);
        }
        for id in expired {
            info!(%id, "sweep: removing expired notification");
            self.remove(&id);
        }
    }

    /// Show a self-expiring notice.  With a fixed `id` an existing notice is
    /// kept as is, so repeated triggers never stack duplicates.
    pub fn notify(
        &mut self,
        id: Option<&str>,
        kind: NotificationKind,
        display: DisplayInfo,
        ttl: Duration,
    ) -> NotificationId {
        let id = match id {
            Some(id) => id.to_string(),
            None => self.next_notice_id(kind),
        };
        if self.registry.contains(&id) {
            return id;
        }
        self.start_or_get(&id, kind, display);
        self.schedule(&id, TimerKind::Decay, ttl);
        id
    }

    pub fn notify_error(&mut self, message: &str) -> NotificationId {
        self.log(LogLevel::Error, message);
        let ttl = self.config.failure_decay();
        self.notify(
            None,
            NotificationKind::Error,
            DisplayInfo::new("Error", message),
            ttl,
        )
    }

    /// Status-only notice; `ttl` defaults to the configured notice lifetime.
    pub fn notify_status(
        &mut self,
        title: &str,
        message: &str,
        ttl: Option<Duration>,
    ) -> NotificationId {
        let ttl = ttl.unwrap_or_else(|| self.config.status_notice());
        self.notify(
            None,
            NotificationKind::StatusOnly,
            DisplayInfo::new(title, message),
            ttl,
        )
    }

    /// Secondary notice for a non-fatal sub-failure of `job_id`.
    pub fn notify_warning(&mut self, job_id: &str, message: &str) -> NotificationId {
        self.log(LogLevel::Warning, message);
        let ttl = self.config.failure_decay();
        self.notify(
            Some(&format!("{job_id}-warning")),
            NotificationKind::StatusOnly,
            DisplayInfo::new("Warning", message),
            ttl,
        )
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info | LogLevel::Success => info!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        let _ = self.events.send(NotificationEvent::Log(LogEntry {
            at: Local::now(),
            level,
            message: message.to_string(),
        }));
    }

    /// Ids that started removal since the last call.
    pub fn drain_retired(&mut self) -> Vec<NotificationId> {
        std::mem::take(&mut self.retired)
    }

    /// Cancel every outstanding timer.
    pub fn shutdown(&mut self) {
        self.root.cancel();
    }

    fn finalize(&mut self, id: &str) {
        if let Some(mut notification) = self.registry.remove(id) {
            notification.timers.cancel();
            notification.state = NotificationState::Removed;
            debug!(id, "notification removed");
            let _ = self.events.send(NotificationEvent::Removed(id.to_string()));
        }
    }

    fn schedule(&self, id: &str, kind: TimerKind, after: Duration) {
        let Some(notification) = self.registry.get(id) else {
            return;
        };
        let token = notification.timers.clone();
        let fired = TimerFired {
            id: id.to_string(),
            generation: notification.generation,
            kind,
        };
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = tx.send(fired);
                }
            }
        });
    }

    fn next_notice_id(&mut self, kind: NotificationKind) -> NotificationId {
        self.notice_seq += 1;
        let prefix = match kind {
            NotificationKind::Error => "error",
            _ => "status",
        };
        format!(
            "{prefix}-{}-{}",
            Local::now().timestamp_millis(),
            self.notice_seq
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::BATCH_NOTIFICATION_ID;

    struct Harness {
        ctrl: ToastController,
        timers: mpsc::UnboundedReceiver<TimerFired>,
        events: broadcast::Receiver<NotificationEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (timer_tx, timers) = mpsc::unbounded_channel();
            let (events_tx, events) = broadcast::channel(256);
            Self {
                ctrl: ToastController::new(LifecycleConfig::default(), timer_tx, events_tx),
                timers,
                events,
            }
        }

        fn track(&mut self, id: &str) {
            self.ctrl
                .start_or_get(id, NotificationKind::Track, DisplayInfo::new(id, "artist"));
        }

        fn state(&self, id: &str) -> Option<NotificationState> {
            self.ctrl.registry().get(id).map(|n| n.state)
        }

        /// Let `d` of (paused) time pass, feeding fired timers back in.
        async fn advance(&mut self, d: Duration) {
            let deadline = Instant::now() + d;
            loop {
                tokio::select! {
                    Some(fired) = self.timers.recv() => self.ctrl.on_timer(fired),
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
            while let Ok(fired) = self.timers.try_recv() {
                self.ctrl.on_timer(fired);
            }
        }

        fn drain_events(&mut self) -> Vec<NotificationEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.events.try_recv() {
                out.push(ev);
            }
            out
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let mut h = Harness::new();
        h.track("job-1");
        h.ctrl.apply_update("job-1", Update::progress(40));
        let again = h.ctrl.start_or_get(
            "job-1",
            NotificationKind::Track,
            DisplayInfo::new("other", "other"),
        );
        assert_eq!(again.progress, 40);
        assert_eq!(again.display.title, "job-1");
        assert_eq!(h.ctrl.registry().len(), 1);

        let created = h
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, NotificationEvent::Created(_)))
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_never_decreases() {
        let mut h = Harness::new();
        h.track("job-1");
        assert_eq!(h.state("job-1"), Some(NotificationState::Pending));

        h.ctrl.apply_update("job-1", Update::progress(40));
        assert_eq!(h.state("job-1"), Some(NotificationState::Active));
        h.ctrl.apply_update("job-1", Update::progress(20));
        assert_eq!(h.ctrl.registry().get("job-1").unwrap().progress, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_decays_then_removes() {
        let mut h = Harness::new();
        h.track("job-1");
        assert_eq!(
            h.ctrl.apply_update("job-1", Update::progress(100)),
            UpdateOutcome::Finalized
        );
        assert_eq!(h.state("job-1"), Some(NotificationState::Completed));

        h.advance(Duration::from_millis(2_400)).await;
        assert_eq!(h.state("job-1"), Some(NotificationState::Completed));

        h.advance(Duration::from_millis(200)).await;
        assert_eq!(h.state("job-1"), Some(NotificationState::Removing));
        assert!(!h.ctrl.registry().get("job-1").unwrap().visible);

        // No transition confirmation: the fallback finalizes it.
        h.advance(Duration::from_millis(500)).await;
        assert_eq!(h.state("job-1"), None);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, NotificationEvent::Removed(id) if id == "job-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_freezes_and_lingers_longer() {
        let mut h = Harness::new();
        h.track("job-1");
        h.ctrl.apply_update("job-1", Update::progress(30));
        h.ctrl.apply_update(
            "job-1",
            Update::outcome(TerminalOutcome::Failure("Track not available".into())),
        );
        let n = h.ctrl.registry().get("job-1").unwrap();
        assert_eq!(n.state, NotificationState::Failed);
        assert_eq!(n.phase, "Track not available");

        assert_eq!(
            h.ctrl.apply_update("job-1", Update::progress(80)),
            UpdateOutcome::Ignored
        );
        assert_eq!(h.ctrl.registry().get("job-1").unwrap().progress, 30);

        h.advance(Duration::from_millis(3_000)).await;
        assert_eq!(h.state("job-1"), Some(NotificationState::Failed));
        h.advance(Duration::from_millis(2_600)).await;
        assert!(matches!(
            h.state("job-1"),
            Some(NotificationState::Removing) | None
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_leaves_failure_until_its_decay() {
        let mut h = Harness::new();
        h.track("job-f");
        h.ctrl.apply_update(
            "job-f",
            Update::outcome(TerminalOutcome::Failure("Region locked".into())),
        );

        // Past the completed grace, short of the failure decay.
        h.ctrl.sweep(Instant::now() + Duration::from_secs(4));
        assert_eq!(h.state("job-f"), Some(NotificationState::Failed));

        h.advance(Duration::from_millis(5_100)).await;
        assert!(matches!(
            h.state("job-f"),
            Some(NotificationState::Removing) | None
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_twice_emits_one_transition() {
        let mut h = Harness::new();
        h.track("job-1");
        h.drain_events();

        assert!(h.ctrl.remove("job-1"));
        assert!(!h.ctrl.remove("job-1"));
        let removing = h
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, NotificationEvent::Removing(_)))
            .count();
        assert_eq!(removing, 1);

        h.ctrl.transition_finished("job-1");
        assert_eq!(h.state("job-1"), None);
        assert_eq!(h.ctrl.drain_retired(), vec!["job-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_cancels_pending_decay() {
        let mut h = Harness::new();
        h.track("job-1");
        h.ctrl.apply_update("job-1", Update::progress(100));
        h.ctrl.remove("job-1");
        h.ctrl.transition_finished("job-1");

        // Same id comes back before the old decay would have fired.
        h.track("job-1");
        h.advance(Duration::from_millis(3_000)).await;
        assert_eq!(h.state("job-1"), Some(NotificationState::Pending));
        assert_eq!(h.ctrl.registry().get("job-1").unwrap().progress, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_during_removal_are_dropped() {
        let mut h = Harness::new();
        h.track("job-1");
        h.ctrl.remove("job-1");
        assert_eq!(
            h.ctrl.apply_update("job-1", Update::progress(50)),
            UpdateOutcome::Ignored
        );
        assert!(!h.ctrl.set_artwork("job-1", "cover.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_enforces_age_ceiling_except_running_batch() {
        let mut h = Harness::new();
        h.track("job-1");
        h.ctrl.start_or_get(
            BATCH_NOTIFICATION_ID,
            NotificationKind::Playlist,
            DisplayInfo::new("Playlist", "12 tracks"),
        );
        h.ctrl.apply_update(BATCH_NOTIFICATION_ID, Update::progress(10));

        h.ctrl.sweep(Instant::now() + Duration::from_secs(31));
        assert_eq!(h.state("job-1"), Some(NotificationState::Removing));
        assert_eq!(
            h.state(BATCH_NOTIFICATION_ID),
            Some(NotificationState::Active)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_clears_lingering_and_stuck_entries() {
        let mut h = Harness::new();
        h.track("done");
        h.track("leaving");
        h.ctrl.apply_update("done", Update::progress(100));
        h.ctrl.remove("leaving");

        h.ctrl.sweep(Instant::now() + Duration::from_millis(3_100));
        assert_eq!(h.state("done"), Some(NotificationState::Removing));
        assert_eq!(h.state("leaving"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_id_notice_does_not_stack() {
        let mut h = Harness::new();
        let first = h.ctrl.notify_warning("job-1", "cover art missing");
        let second = h.ctrl.notify_warning("job-1", "cover art missing");
        assert_eq!(first, second);
        assert_eq!(h.ctrl.registry().len(), 1);

        h.advance(Duration::from_millis(5_600)).await;
        assert!(h.ctrl.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_jobs_keeps_notices() {
        let mut h = Harness::new();
        h.track("job-1");
        let notice = h.ctrl.notify_error("Missing service");
        assert_eq!(h.ctrl.remove_jobs(), 1);
        assert_eq!(h.state(&notice), Some(NotificationState::Active));
    }
}
