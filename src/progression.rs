use crate::config::SyncConfig;
use crate::model::{Activity, ContentItem, ContentKey, GameSnapshot, SessionStatus};
use std::time::Duration;
use tracing::debug;

/// Where the session currently stands from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No snapshot applied yet.
    Loading,
    /// A content unit is presented (the countdown may be held while the
    /// session is paused).
    Active,
    /// A newer unit has been announced and is settling in.
    Transitioning,
    /// Terminal. No event moves the machine out of this phase.
    Completed,
}

/// An input to the machine: a decoded topic event, a timer expiry, or the
/// end of a settle delay.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressionEvent {
    SnapshotLoaded(GameSnapshot),
    ActivityPushed(Activity),
    ContentAdvanced {
        activity_id: Option<String>,
        index: usize,
        item: Option<ContentItem>,
    },
    StatusChanged(SessionStatus),
    TimerExpired(ContentKey),
    SettleElapsed,
    AdvanceTimedOut(ContentKey),
}

/// A side effect the driver must carry out. The machine itself never
/// performs IO or spawns tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartTimer { key: ContentKey, duration_secs: u64 },
    StopTimer,
    RequestAdvance { activity_id: String, index: usize },
    ScheduleSettle(Duration),
    ScheduleAdvanceTimeout(ContentKey),
    RefetchSnapshot,
    Teardown,
}

/// The next unit waiting out its settle delay before being presented.
#[derive(Debug, Clone, PartialEq)]
struct PendingUnit {
    /// `Some` when a whole new activity was pushed; `None` for an index
    /// advance within the current activity.
    activity: Option<Activity>,
    index: usize,
    item: Option<ContentItem>,
}

/// Pure progression core. Events go in, effects come out; all timing and
/// IO stays with the driver.
///
/// Ordering rules: within one activity the content index only moves
/// forward, a re-announcement of the current activity or a unit at or
/// below the current index is discarded as stale, and `COMPLETED` is
/// terminal.
pub struct ProgressionMachine {
    phase: Phase,
    session_status: SessionStatus,
    activity: Option<Activity>,
    content_index: usize,
    content_item: Option<ContentItem>,
    pending: Option<PendingUnit>,
    advance_requested: bool,
    activity_settle: Duration,
    content_settle: Duration,
}

impl ProgressionMachine {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            phase: Phase::Loading,
            session_status: SessionStatus::Lobby,
            activity: None,
            content_index: 0,
            content_item: None,
            pending: None,
            advance_requested: false,
            activity_settle: config.activity_settle,
            content_settle: config.content_settle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session_status(&self) -> SessionStatus {
        self.session_status
    }

    pub fn activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    pub fn content_index(&self) -> usize {
        self.content_index
    }

    pub fn content_item(&self) -> Option<&ContentItem> {
        self.content_item.as_ref()
    }

    /// Identity of the unit currently presented, when there is one.
    pub fn current_key(&self) -> Option<ContentKey> {
        self.activity
            .as_ref()
            .map(|activity| ContentKey::new(activity.id.clone(), self.content_index))
    }

    /// Feed one event through the machine, returning the effects the
    /// driver must execute, in order.
    pub fn apply(&mut self, event: ProgressionEvent) -> Vec<Effect> {
        if self.phase == Phase::Completed {
            return Vec::new();
        }
        match event {
            ProgressionEvent::SnapshotLoaded(snapshot) => self.on_snapshot(snapshot),
            ProgressionEvent::ActivityPushed(activity) => self.on_activity(activity),
            ProgressionEvent::ContentAdvanced {
                activity_id,
                index,
                item,
            } => self.on_content(activity_id, index, item),
            ProgressionEvent::StatusChanged(status) => self.on_status(status),
            ProgressionEvent::TimerExpired(key) => self.on_timer_expired(key),
            ProgressionEvent::SettleElapsed => self.on_settle_elapsed(),
            ProgressionEvent::AdvanceTimedOut(key) => self.on_advance_timed_out(key),
        }
    }

    /// Snapshots are authoritative and apply wholesale, replacing all
    /// progression state in one step.
    fn on_snapshot(&mut self, snapshot: GameSnapshot) -> Vec<Effect> {
        if let Some(status) = snapshot.status {
            self.session_status = status;
        }
        if self.session_status.is_terminal() {
            return self.complete();
        }

        self.pending = None;
        self.advance_requested = false;
        self.content_index = snapshot.current_content_index;
        self.activity = snapshot.current_activity;
        self.content_item = self
            .activity
            .as_ref()
            .and_then(|a| a.content_item(self.content_index))
            .cloned();

        match (&self.activity, self.session_status) {
            (Some(activity), SessionStatus::Active) => {
                self.phase = Phase::Active;
                let key = ContentKey::new(activity.id.clone(), self.content_index);
                let duration_secs = activity.unit_duration(self.content_index);
                vec![Effect::StopTimer, Effect::StartTimer { key, duration_secs }]
            }
            (Some(_), _) => {
                // Unit known but the countdown is held until ACTIVE.
                self.phase = Phase::Active;
                vec![Effect::StopTimer]
            }
            (None, _) => {
                self.phase = Phase::Loading;
                vec![Effect::StopTimer]
            }
        }
    }

    fn on_activity(&mut self, activity: Activity) -> Vec<Effect> {
        let announced = self
            .pending
            .as_ref()
            .and_then(|p| p.activity.as_ref())
            .map(|a| a.id.clone())
            .or_else(|| self.activity.as_ref().map(|a| a.id.clone()));
        if announced.as_deref() == Some(activity.id.as_str()) {
            debug!(activity = %activity.id, "discarding re-announced activity");
            return Vec::new();
        }

        let item = activity.content_item(0).cloned();
        self.pending = Some(PendingUnit {
            activity: Some(activity),
            index: 0,
            item,
        });
        self.phase = Phase::Transitioning;
        vec![Effect::StopTimer, Effect::ScheduleSettle(self.activity_settle)]
    }

    fn on_content(
        &mut self,
        activity_id: Option<String>,
        index: usize,
        item: Option<ContentItem>,
    ) -> Vec<Effect> {
        if let (Some(announced), Some(current)) = (&activity_id, &self.activity) {
            if announced != &current.id && !self.pending_matches(announced) {
                debug!(announced, "discarding content advance for another activity");
                return Vec::new();
            }
        }
        let floor = self
            .pending
            .as_ref()
            .map(|p| p.index)
            .unwrap_or(self.content_index);
        // Out-of-order or duplicate delivery: the index never moves back.
        if index <= floor && self.activity.is_some() {
            debug!(index, floor, "discarding stale content advance");
            return Vec::new();
        }

        // A push for the activity that is still settling replaces the
        // pending unit but must not lose the activity itself.
        let pending_activity = self
            .pending
            .take()
            .and_then(|p| p.activity)
            .filter(|a| activity_id.as_deref().map_or(true, |id| a.id == id));
        let item = item.or_else(|| {
            pending_activity
                .as_ref()
                .or(self.activity.as_ref())
                .and_then(|a| a.content_item(index))
                .cloned()
        });
        self.pending = Some(PendingUnit {
            activity: pending_activity,
            index,
            item,
        });
        self.phase = Phase::Transitioning;
        vec![Effect::StopTimer, Effect::ScheduleSettle(self.content_settle)]
    }

    fn pending_matches(&self, activity_id: &str) -> bool {
        self.pending
            .as_ref()
            .and_then(|p| p.activity.as_ref())
            .map(|a| a.id == activity_id)
            .unwrap_or(false)
    }

    fn on_settle_elapsed(&mut self) -> Vec<Effect> {
        let Some(pending) = self.pending.take() else {
            return Vec::new();
        };
        if let Some(activity) = pending.activity {
            self.activity = Some(activity);
        }
        self.content_index = pending.index;
        self.content_item = pending.item.or_else(|| {
            self.activity
                .as_ref()
                .and_then(|a| a.content_item(self.content_index))
                .cloned()
        });
        self.advance_requested = false;
        self.phase = Phase::Active;

        match (&self.activity, self.session_status) {
            (Some(activity), SessionStatus::Active) => {
                let key = ContentKey::new(activity.id.clone(), self.content_index);
                let duration_secs = activity.unit_duration(self.content_index);
                vec![Effect::StartTimer { key, duration_secs }]
            }
            _ => Vec::new(),
        }
    }

    /// A local expiry is a hint, not a decision: ask the server once per
    /// unit and wait for the `content` topic to answer.
    fn on_timer_expired(&mut self, key: ContentKey) -> Vec<Effect> {
        if self.phase != Phase::Active
            || self.advance_requested
            || self.session_status != SessionStatus::Active
            || self.current_key().as_ref() != Some(&key)
        {
            return Vec::new();
        }
        self.advance_requested = true;
        vec![
            Effect::RequestAdvance {
                activity_id: key.activity_id.clone(),
                index: key.index,
            },
            Effect::ScheduleAdvanceTimeout(key),
        ]
    }

    /// The server never answered an advance request; resynchronize from
    /// the authoritative snapshot instead of guessing.
    fn on_advance_timed_out(&mut self, key: ContentKey) -> Vec<Effect> {
        if self.advance_requested && self.current_key().as_ref() == Some(&key) {
            return vec![Effect::RefetchSnapshot];
        }
        Vec::new()
    }

    fn on_status(&mut self, status: SessionStatus) -> Vec<Effect> {
        if status.is_terminal() {
            self.session_status = status;
            return self.complete();
        }
        let previous = self.session_status;
        self.session_status = status;
        match status {
            SessionStatus::Paused => vec![Effect::StopTimer],
            SessionStatus::Active if previous != SessionStatus::Active => {
                if self.phase == Phase::Loading {
                    return vec![Effect::RefetchSnapshot];
                }
                // Going live (or resuming) with a unit already in hand
                // restarts its countdown from the full duration.
                match (&self.activity, self.phase) {
                    (Some(activity), Phase::Active) => {
                        let key = ContentKey::new(activity.id.clone(), self.content_index);
                        let duration_secs = activity.unit_duration(self.content_index);
                        vec![Effect::StartTimer { key, duration_secs }]
                    }
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn complete(&mut self) -> Vec<Effect> {
        self.phase = Phase::Completed;
        self.pending = None;
        self.activity = None;
        self.content_item = None;
        vec![Effect::StopTimer, Effect::Teardown]
    }
}
