use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gateway::SessionApi;
use crate::model::{
    Activity, AnswerSubmission, ContentItem, ContentKey, GameSnapshot, LeaderboardEntry,
    SessionStatus, SubmissionResult,
};
use crate::network::{ChannelManager, Subscription, TopicEvent, TopicKind};
use crate::progression::{Effect, Phase, ProgressionEvent, ProgressionMachine};
use crate::timer::{ContentTimer, TimerExpired};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Render-ready snapshot of the engine's state, published on every
/// change through a watch channel.
#[derive(Debug, Clone)]
pub struct EngineView {
    pub phase: Phase,
    pub session_status: SessionStatus,
    pub activity: Option<Activity>,
    pub content_index: usize,
    pub content_item: Option<ContentItem>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl Default for EngineView {
    fn default() -> Self {
        Self {
            phase: Phase::Loading,
            session_status: SessionStatus::Lobby,
            activity: None,
            content_index: 0,
            content_item: None,
            leaderboard: Vec::new(),
        }
    }
}

enum InternalEvent {
    SettleElapsed,
    AdvanceTimedOut(ContentKey),
    Snapshot(GameSnapshot),
}

/// Drives the session lifecycle: feeds decoded topic events, timer
/// expiries, and settle delays through the progression core and carries
/// out the effects it returns.
///
/// Must be started inside a tokio runtime. The engine tears itself down
/// once the session completes or is lost; `close` tears it down early.
pub struct SessionEngine {
    view_rx: watch::Receiver<EngineView>,
    remaining_rx: watch::Receiver<u64>,
    api: Arc<dyn SessionApi>,
    channels: Arc<ChannelManager>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEngine {
    pub fn start(
        config: SyncConfig,
        api: Arc<dyn SessionApi>,
        channels: Arc<ChannelManager>,
    ) -> Result<Self, SyncError> {
        let activity = channels.subscribe(TopicKind::Activity)?;
        let status = channels.subscribe(TopicKind::Status)?;
        let leaderboard = channels.subscribe(TopicKind::Leaderboard)?;
        let content = channels.subscribe(TopicKind::Content)?;

        let timer = ContentTimer::new();
        let remaining_rx = timer.remaining();
        let (view_tx, view_rx) = watch::channel(EngineView::default());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine: ProgressionMachine::new(&config),
            config,
            api: api.clone(),
            channels: channels.clone(),
            timer,
            view_tx,
            leaderboard: Vec::new(),
            internal_tx,
            expiry_tx,
            settle: None,
            advance_timeout: None,
            refetch: None,
        };
        let task = tokio::spawn(run_engine(
            driver,
            Streams {
                activity,
                status,
                leaderboard,
                content,
                internal: internal_rx,
                expiry: expiry_rx,
            },
        ));

        Ok(Self {
            view_rx,
            remaining_rx,
            api,
            channels,
            driver: Mutex::new(Some(task)),
        })
    }

    /// Submit an answer for the content unit currently presented. The
    /// verdict is returned to the caller; progression is unaffected.
    pub async fn submit_answer(
        &self,
        answer: serde_json::Value,
    ) -> Result<SubmissionResult, SyncError> {
        let submission = {
            let view = self.view_rx.borrow();
            let activity = view.activity.as_ref().ok_or(SyncError::SnapshotDivergence)?;
            AnswerSubmission {
                activity_id: activity.id.clone(),
                content_id: view
                    .content_item
                    .as_ref()
                    .map(|item| item.content_id.clone())
                    .unwrap_or_else(|| "legacy".to_string()),
                content_index: view.content_index,
                answer,
            }
        };
        self.api.submit_answer(&submission).await
    }

    /// Observe the engine's state. The receiver always holds the latest
    /// published view.
    pub fn view(&self) -> watch::Receiver<EngineView> {
        self.view_rx.clone()
    }

    /// Seconds left on the current content unit, for display.
    pub fn remaining(&self) -> watch::Receiver<u64> {
        self.remaining_rx.clone()
    }

    /// Tear down the driver and release the session's subscriptions.
    pub fn close(&self) {
        if let Some(task) = self.driver.lock().expect("engine state poisoned").take() {
            task.abort();
        }
        self.channels.close();
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

struct Streams {
    activity: Subscription,
    status: Subscription,
    leaderboard: Subscription,
    content: Subscription,
    internal: UnboundedReceiver<InternalEvent>,
    expiry: UnboundedReceiver<TimerExpired>,
}

struct Driver {
    config: SyncConfig,
    api: Arc<dyn SessionApi>,
    channels: Arc<ChannelManager>,
    machine: ProgressionMachine,
    timer: ContentTimer,
    view_tx: watch::Sender<EngineView>,
    leaderboard: Vec<LeaderboardEntry>,
    internal_tx: UnboundedSender<InternalEvent>,
    expiry_tx: UnboundedSender<TimerExpired>,
    settle: Option<JoinHandle<()>>,
    advance_timeout: Option<JoinHandle<()>>,
    refetch: Option<JoinHandle<()>>,
}

async fn run_engine(mut driver: Driver, mut streams: Streams) {
    driver.spawn_refetch();
    loop {
        let terminated = tokio::select! {
            maybe = streams.activity.events.recv() => driver.on_topic(maybe),
            maybe = streams.status.events.recv() => driver.on_topic(maybe),
            maybe = streams.leaderboard.events.recv() => driver.on_topic(maybe),
            maybe = streams.content.events.recv() => driver.on_topic(maybe),
            maybe = streams.expiry.recv() => driver.on_expiry(maybe),
            maybe = streams.internal.recv() => driver.on_internal(maybe),
        };
        if terminated {
            break;
        }
    }
    driver.teardown();
}

impl Driver {
    fn on_topic(&mut self, event: Option<TopicEvent>) -> bool {
        let Some(event) = event else {
            warn!("topic stream ended, shutting the engine down");
            return true;
        };
        match event {
            TopicEvent::Activity(activity) => {
                self.feed(ProgressionEvent::ActivityPushed(activity))
            }
            TopicEvent::Status(status) => self.feed(ProgressionEvent::StatusChanged(status)),
            TopicEvent::Content(advance) => self.feed(ProgressionEvent::ContentAdvanced {
                activity_id: advance.activity_id,
                index: advance.current_index,
                item: advance.content_item,
            }),
            TopicEvent::Leaderboard(entries) => {
                self.leaderboard = entries;
                self.publish();
                false
            }
            TopicEvent::SessionLost => {
                warn!("session lost, shutting the engine down");
                true
            }
            TopicEvent::Participants(_) | TopicEvent::Guess(_) => false,
        }
    }

    fn on_expiry(&mut self, expired: Option<TimerExpired>) -> bool {
        let Some(expired) = expired else {
            return true;
        };
        // A restart may have raced the expiry through the channel.
        if expired.generation != self.timer.generation() {
            debug!(generation = expired.generation, "discarding stale expiry");
            return false;
        }
        self.feed(ProgressionEvent::TimerExpired(expired.key))
    }

    fn on_internal(&mut self, event: Option<InternalEvent>) -> bool {
        match event {
            Some(InternalEvent::SettleElapsed) => self.feed(ProgressionEvent::SettleElapsed),
            Some(InternalEvent::AdvanceTimedOut(key)) => {
                self.feed(ProgressionEvent::AdvanceTimedOut(key))
            }
            Some(InternalEvent::Snapshot(snapshot)) => {
                self.feed(ProgressionEvent::SnapshotLoaded(snapshot))
            }
            None => true,
        }
    }

    fn feed(&mut self, event: ProgressionEvent) -> bool {
        let effects = self.machine.apply(event);
        let terminated = self.execute(effects);
        self.publish();
        terminated
    }

    fn execute(&mut self, effects: Vec<Effect>) -> bool {
        let mut terminated = false;
        for effect in effects {
            match effect {
                Effect::StartTimer { key, duration_secs } => {
                    self.timer.start(key, duration_secs, self.expiry_tx.clone());
                }
                Effect::StopTimer => self.timer.stop(),
                Effect::ScheduleSettle(delay) => {
                    if let Some(handle) = self.settle.take() {
                        handle.abort();
                    }
                    let tx = self.internal_tx.clone();
                    self.settle = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(InternalEvent::SettleElapsed);
                    }));
                }
                Effect::ScheduleAdvanceTimeout(key) => {
                    if let Some(handle) = self.advance_timeout.take() {
                        handle.abort();
                    }
                    let delay = self.config.advance_timeout;
                    let tx = self.internal_tx.clone();
                    self.advance_timeout = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(InternalEvent::AdvanceTimedOut(key));
                    }));
                }
                Effect::RequestAdvance { activity_id, index } => {
                    let api = self.api.clone();
                    tokio::spawn(async move {
                        if let Err(e) = api.request_advance(&activity_id, index).await {
                            // The advance-timeout path recovers from this.
                            warn!(activity_id, index, error = %e, "advance request failed");
                        }
                    });
                }
                Effect::RefetchSnapshot => self.spawn_refetch(),
                Effect::Teardown => terminated = true,
            }
        }
        terminated
    }

    /// Fetch the authoritative snapshot with a fixed back-off, feeding it
    /// back into the event loop. At most one fetch is in flight.
    fn spawn_refetch(&mut self) {
        if let Some(handle) = self.refetch.take() {
            handle.abort();
        }
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        let delay = self.config.reconnect_delay;
        let attempts = self.config.max_reconnect_attempts;
        self.refetch = Some(tokio::spawn(async move {
            for attempt in 1..=attempts {
                match api.fetch_game().await {
                    Ok(snapshot) => {
                        let _ = tx.send(InternalEvent::Snapshot(snapshot));
                        return;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "snapshot fetch failed");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            warn!("giving up on snapshot fetch");
        }));
    }

    fn publish(&self) {
        let _ = self.view_tx.send(EngineView {
            phase: self.machine.phase(),
            session_status: self.machine.session_status(),
            activity: self.machine.activity().cloned(),
            content_index: self.machine.content_index(),
            content_item: self.machine.content_item().cloned(),
            leaderboard: self.leaderboard.clone(),
        });
    }

    fn teardown(&mut self) {
        info!("engine shutting down");
        self.timer.stop();
        self.abort_helpers();
        self.channels.close();
    }

    fn abort_helpers(&mut self) {
        for handle in [
            self.settle.take(),
            self.advance_timeout.take(),
            self.refetch.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

// Aborting the driver task must not detach the helper tasks it spawned.
impl Drop for Driver {
    fn drop(&mut self) {
        self.abort_helpers();
    }
}
