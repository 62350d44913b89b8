use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gateway::SessionApi;
use crate::model::{ChallengeState, ChallengeStatus, GuessRecord, Team, TeamRole, UserId};
use crate::network::{ChannelManager, SubscriptionToken, TopicEvent, TopicKind};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Changes the coordinator surfaces to its consumer. Identical
/// consecutive snapshots are swallowed; an event means something actually
/// changed.
#[derive(Debug, Clone, PartialEq)]
pub enum TeamEvent {
    SnapshotApplied(ChallengeStatus),
    TeamAssigned { team_id: String },
    RoleChanged { role: TeamRole },
    GuessRecorded(GuessRecord),
    ChallengeCompleted,
}

#[derive(Default)]
struct TeamState {
    last_status: Option<ChallengeStatus>,
    teams: Vec<Team>,
    team: Option<Team>,
    role: Option<TeamRole>,
}

struct Handles {
    team_poll: Mutex<Option<JoinHandle<()>>>,
    status_poll: Mutex<Option<JoinHandle<()>>>,
    participants: Mutex<Option<JoinHandle<()>>>,
    guess: Mutex<Option<(SubscriptionToken, JoinHandle<()>)>>,
}

struct Ctx {
    config: SyncConfig,
    api: Arc<dyn SessionApi>,
    channels: Arc<ChannelManager>,
    me: UserId,
    state: Mutex<TeamState>,
    events_tx: UnboundedSender<TeamEvent>,
    handles: Handles,
}

/// Reconciles the client's view of the team challenge against the server.
///
/// Team and challenge snapshots arrive both as pushes and through two
/// fallback polls: a team-discovery poll that runs only while the
/// challenge is active and no team is known, and a status poll that runs
/// until the challenge completes. Every inbound snapshot goes through the
/// same deduplicating reconciliation, so the source of a snapshot never
/// matters to the consumer.
pub struct TeamCoordinator {
    ctx: Arc<Ctx>,
}

impl TeamCoordinator {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn SessionApi>,
        channels: Arc<ChannelManager>,
        me: UserId,
    ) -> (Self, UnboundedReceiver<TeamEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Ctx {
            config,
            api,
            channels,
            me,
            state: Mutex::new(TeamState::default()),
            events_tx,
            handles: Handles {
                team_poll: Mutex::new(None),
                status_poll: Mutex::new(None),
                participants: Mutex::new(None),
                guess: Mutex::new(None),
            },
        });
        (Self { ctx }, events_rx)
    }

    /// Ensure teams exist, pull the initial snapshots, and start the
    /// fallback polls. Creation is idempotent server-side; a conflict
    /// means another client got there first and counts as success.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        let ctx = &self.ctx;
        for attempt in 1..=ctx.config.team_create_retries {
            match ctx.api.create_teams(true).await {
                Ok(()) => break,
                Err(SyncError::RequestFailed { reason }) if reason.contains("already") => {
                    debug!("teams already exist");
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "team creation failed");
                    if attempt < ctx.config.team_create_retries {
                        tokio::time::sleep(ctx.config.team_create_retry_delay).await;
                    }
                }
            }
        }

        match ctx.api.fetch_challenge_status().await {
            Ok(status) => ctx.reconcile_status(status),
            Err(e) => warn!(error = %e, "initial challenge status fetch failed"),
        }
        match ctx.api.fetch_teams().await {
            Ok(teams) => ctx.reconcile_teams(teams),
            Err(e) => warn!(error = %e, "initial team fetch failed"),
        }

        let team_known = ctx.state.lock().expect("team state poisoned").team.is_some();
        if !team_known {
            ctx.start_team_poll();
            ctx.start_participants_trigger();
        }
        ctx.start_status_poll();
        Ok(())
    }

    /// The caller's team, once known.
    pub fn team(&self) -> Option<Team> {
        self.ctx.state.lock().expect("team state poisoned").team.clone()
    }

    /// The caller's role within their team, once known.
    pub fn role(&self) -> Option<TeamRole> {
        self.ctx.state.lock().expect("team state poisoned").role
    }

    /// The last reconciled challenge snapshot.
    pub fn challenge_status(&self) -> Option<ChallengeStatus> {
        self.ctx
            .state
            .lock()
            .expect("team state poisoned")
            .last_status
            .clone()
    }

    /// Submit a guess. Rejected locally, before any request goes out,
    /// unless the caller is a guesser with a known team and the guess is
    /// non-empty.
    pub async fn submit_guess(&self, guess: &str) -> Result<(), SyncError> {
        let trimmed = guess.trim();
        if trimmed.is_empty() {
            return Err(SyncError::NotAuthorizedRole {
                required: "guesser",
            });
        }
        let team_id = self.require_role(TeamRole::Guesser, "guesser")?;
        self.ctx.api.submit_guess(&team_id, trimmed).await?;
        self.refresh_status().await;
        Ok(())
    }

    /// Hand the drawer role to another team member. Drawer only.
    pub async fn switch_drawer(&self, new_drawer: &UserId) -> Result<(), SyncError> {
        let team_id = self.require_role(TeamRole::Drawer, "drawer")?;
        self.ctx.api.switch_drawer(&team_id, new_drawer).await?;
        match self.ctx.api.fetch_teams().await {
            Ok(teams) => self.ctx.reconcile_teams(teams),
            Err(e) => warn!(error = %e, "team refresh after drawer switch failed"),
        }
        self.refresh_status().await;
        Ok(())
    }

    /// Stop the polls and release the guess subscription.
    pub fn close(&self) {
        let handles = &self.ctx.handles;
        for slot in [&handles.team_poll, &handles.status_poll, &handles.participants] {
            if let Some(handle) = slot.lock().expect("team state poisoned").take() {
                handle.abort();
            }
        }
        if let Some((token, handle)) = handles.guess.lock().expect("team state poisoned").take() {
            handle.abort();
            self.ctx.channels.unsubscribe(&token);
        }
    }

    fn require_role(&self, role: TeamRole, name: &'static str) -> Result<String, SyncError> {
        let state = self.ctx.state.lock().expect("team state poisoned");
        if state.role != Some(role) {
            return Err(SyncError::NotAuthorizedRole { required: name });
        }
        state
            .team
            .as_ref()
            .map(|team| team.id.clone())
            .ok_or(SyncError::NotAuthorizedRole { required: name })
    }

    async fn refresh_status(&self) {
        match self.ctx.api.fetch_challenge_status().await {
            Ok(status) => self.ctx.reconcile_status(status),
            Err(e) => warn!(error = %e, "challenge status refresh failed"),
        }
    }
}

impl Drop for TeamCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl Ctx {
    fn emit(&self, event: TeamEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Apply a team-list snapshot. An identical list is dropped without
    /// events; otherwise membership and role changes are derived and
    /// announced.
    fn reconcile_teams(self: &Arc<Self>, teams: Vec<Team>) {
        let mut assigned: Option<String> = None;
        let mut new_role: Option<TeamRole> = None;
        {
            let mut state = self.state.lock().expect("team state poisoned");
            if state.teams == teams {
                return;
            }
            state.teams = teams.clone();
            if let Some(team) = teams.into_iter().find(|t| t.has_member(&self.me)) {
                let role = team.role_of(&self.me);
                if state.team.as_ref().map(|t| t.id.as_str()) != Some(team.id.as_str()) {
                    assigned = Some(team.id.clone());
                }
                if state.role != Some(role) {
                    state.role = Some(role);
                    new_role = Some(role);
                }
                state.team = Some(team);
            }
        }

        if let Some(team_id) = assigned {
            debug!(%team_id, "team assigned");
            self.emit(TeamEvent::TeamAssigned {
                team_id: team_id.clone(),
            });
            self.stop_team_poll();
            self.start_guess_listener(team_id);
        }
        if let Some(role) = new_role {
            self.emit(TeamEvent::RoleChanged { role });
        }
    }

    /// Apply a challenge snapshot wholesale, dropping exact duplicates.
    fn reconcile_status(self: &Arc<Self>, status: ChallengeStatus) {
        let completed_now;
        {
            let mut state = self.state.lock().expect("team state poisoned");
            if state.last_status.as_ref() == Some(&status) {
                return;
            }
            completed_now = status.status == ChallengeState::Completed
                && state.last_status.as_ref().map(|s| s.status)
                    != Some(ChallengeState::Completed);
            state.last_status = Some(status.clone());
        }

        self.emit(TeamEvent::SnapshotApplied(status.clone()));
        if !status.team_info.is_empty() {
            self.reconcile_teams(status.team_info);
        }
        if completed_now {
            self.emit(TeamEvent::ChallengeCompleted);
        }
    }

    fn start_team_poll(self: &Arc<Self>) {
        let ctx = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ctx.config.team_poll_interval).await;
                let (team_known, challenge_active) = {
                    let state = ctx.state.lock().expect("team state poisoned");
                    (
                        state.team.is_some(),
                        state
                            .last_status
                            .as_ref()
                            .map(|s| s.status == ChallengeState::Active)
                            .unwrap_or(false),
                    )
                };
                if team_known {
                    break;
                }
                if !challenge_active {
                    continue;
                }
                match ctx.api.fetch_teams().await {
                    Ok(teams) => ctx.reconcile_teams(teams),
                    Err(e) => warn!(error = %e, "team poll failed"),
                }
            }
        });
        self.replace_handle(&self.handles.team_poll, handle);
    }

    fn start_status_poll(self: &Arc<Self>) {
        let ctx = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ctx.config.status_poll_interval).await;
                let completed = {
                    let state = ctx.state.lock().expect("team state poisoned");
                    state
                        .last_status
                        .as_ref()
                        .map(|s| s.status == ChallengeState::Completed)
                        .unwrap_or(false)
                };
                if completed {
                    break;
                }
                match ctx.api.fetch_challenge_status().await {
                    Ok(status) => ctx.reconcile_status(status),
                    Err(e) => warn!(error = %e, "status poll failed"),
                }
            }
        });
        self.replace_handle(&self.handles.status_poll, handle);
    }

    /// Roster changes are a cheap hint that team assignments may have
    /// happened; only useful while no team is known.
    fn start_participants_trigger(self: &Arc<Self>) {
        let subscription = match self.channels.subscribe(TopicKind::Participants) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "participants subscription failed");
                return;
            }
        };
        let ctx = self.clone();
        let mut events = subscription.events;
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TopicEvent::Participants(_) => {
                        let team_known =
                            ctx.state.lock().expect("team state poisoned").team.is_some();
                        if team_known {
                            break;
                        }
                        match ctx.api.fetch_teams().await {
                            Ok(teams) => ctx.reconcile_teams(teams),
                            Err(e) => warn!(error = %e, "team fetch after roster change failed"),
                        }
                    }
                    TopicEvent::SessionLost => break,
                    _ => {}
                }
            }
        });
        self.replace_handle(&self.handles.participants, handle);
    }

    fn start_guess_listener(self: &Arc<Self>, team_id: String) {
        let subscription = match self.channels.subscribe(TopicKind::Guess { team_id }) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "guess subscription failed");
                return;
            }
        };
        let ctx = self.clone();
        let token = subscription.token.clone();
        let mut events = subscription.events;
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TopicEvent::Guess(record) => {
                        ctx.emit(TeamEvent::GuessRecorded(record));
                        // A broadcast guess may have ended the round.
                        match ctx.api.fetch_challenge_status().await {
                            Ok(status) => ctx.reconcile_status(status),
                            Err(e) => warn!(error = %e, "status fetch after guess failed"),
                        }
                    }
                    TopicEvent::SessionLost => break,
                    _ => {}
                }
            }
        });

        let mut slot = self.handles.guess.lock().expect("team state poisoned");
        if let Some((old_token, old_handle)) = slot.replace((token, handle)) {
            old_handle.abort();
            self.channels.unsubscribe(&old_token);
        }
    }

    fn stop_team_poll(&self) {
        if let Some(handle) = self
            .handles
            .team_poll
            .lock()
            .expect("team state poisoned")
            .take()
        {
            handle.abort();
        }
    }

    fn replace_handle(&self, slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
        if let Some(previous) = slot
            .lock()
            .expect("team state poisoned")
            .replace(handle)
        {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activity, AnswerSubmission, GameSnapshot, SubmissionResult};
    use crate::network::{SessionCredentials, Transport, TransportConnection};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn connect(&self) -> Result<TransportConnection, SyncError> {
            Err(SyncError::TransportDisconnected)
        }
    }

    #[derive(Default)]
    struct FakeApi {
        teams: Mutex<Vec<Team>>,
        status: Mutex<ChallengeStatus>,
        fetch_teams_calls: AtomicUsize,
        guess_calls: AtomicUsize,
        switch_calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionApi for FakeApi {
        async fn fetch_game(&self) -> Result<GameSnapshot, SyncError> {
            Err(SyncError::request_failed("not scripted"))
        }

        async fn fetch_activity(&self, _activity_id: &str) -> Result<Activity, SyncError> {
            Err(SyncError::request_failed("not scripted"))
        }

        async fn submit_answer(
            &self,
            _submission: &AnswerSubmission,
        ) -> Result<SubmissionResult, SyncError> {
            Err(SyncError::request_failed("not scripted"))
        }

        async fn request_advance(
            &self,
            _activity_id: &str,
            _content_index: usize,
        ) -> Result<(), SyncError> {
            Ok(())
        }

        async fn fetch_teams(&self) -> Result<Vec<Team>, SyncError> {
            self.fetch_teams_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.teams.lock().unwrap().clone())
        }

        async fn fetch_challenge_status(&self) -> Result<ChallengeStatus, SyncError> {
            Ok(self.status.lock().unwrap().clone())
        }

        async fn create_teams(&self, _auto_assign: bool) -> Result<(), SyncError> {
            Ok(())
        }

        async fn submit_guess(&self, _team_id: &str, _guess: &str) -> Result<(), SyncError> {
            self.guess_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn switch_drawer(
            &self,
            _team_id: &str,
            _new_drawer_id: &UserId,
        ) -> Result<(), SyncError> {
            self.switch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn team_with(me: &str, drawer: &str) -> Team {
        serde_json::from_value(json!({
            "id": "t1",
            "teamName": "Red",
            "members": [{"userId": me}, {"userId": "other"}],
            "currentDrawerId": drawer
        }))
        .unwrap()
    }

    fn coordinator(
        api: Arc<FakeApi>,
    ) -> (TeamCoordinator, UnboundedReceiver<TeamEvent>) {
        let config = SyncConfig::default();
        let channels = Arc::new(ChannelManager::open(
            SyncConfig {
                reconnect_delay: Duration::from_secs(3600),
                ..config.clone()
            },
            Arc::new(NoTransport),
            SessionCredentials::new("ABC123", "token"),
        ));
        TeamCoordinator::new(config, api, channels, UserId::from("me"))
    }

    #[tokio::test(start_paused = true)]
    async fn identical_team_snapshot_emits_no_second_event() {
        let api = Arc::new(FakeApi::default());
        let (coordinator, mut events) = coordinator(api);

        let teams = vec![team_with("me", "other")];
        coordinator.ctx.reconcile_teams(teams.clone());
        assert_eq!(
            events.try_recv().unwrap(),
            TeamEvent::TeamAssigned {
                team_id: "t1".into()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TeamEvent::RoleChanged {
                role: TeamRole::Guesser
            }
        );

        coordinator.ctx.reconcile_teams(teams);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn drawer_guess_is_rejected_before_any_request() {
        let api = Arc::new(FakeApi::default());
        let (coordinator, _events) = coordinator(api.clone());

        coordinator.ctx.reconcile_teams(vec![team_with("me", "me")]);
        assert_eq!(coordinator.role(), Some(TeamRole::Drawer));

        let err = coordinator.submit_guess("a boat").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NotAuthorizedRole { required: "guesser" }
        ));
        assert_eq!(api.guess_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_guess_never_reaches_the_server() {
        let api = Arc::new(FakeApi::default());
        let (coordinator, _events) = coordinator(api.clone());
        coordinator.ctx.reconcile_teams(vec![team_with("me", "other")]);

        let err = coordinator.submit_guess("   ").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NotAuthorizedRole { required: "guesser" }
        ));
        assert_eq!(api.guess_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn numeric_drawer_id_matches_string_identity() {
        let api = Arc::new(FakeApi::default());
        let (coordinator, _events) = coordinator(api);

        let team: Team = serde_json::from_value(json!({
            "id": "t1",
            "members": [{"userId": 42}],
            "currentDrawerId": "42"
        }))
        .unwrap();
        let (inner, _rx) = TeamCoordinator::new(
            SyncConfig::default(),
            Arc::new(FakeApi::default()),
            coordinator.ctx.channels.clone(),
            UserId::from(42u64),
        );
        inner.ctx.reconcile_teams(vec![team]);
        assert_eq!(inner.role(), Some(TeamRole::Drawer));
    }

    #[tokio::test(start_paused = true)]
    async fn team_poll_stops_once_a_team_is_known() {
        let api = Arc::new(FakeApi::default());
        *api.teams.lock().unwrap() = vec![team_with("me", "other")];
        let (coordinator, _events) = coordinator(api.clone());

        {
            let mut state = coordinator.ctx.state.lock().unwrap();
            state.last_status = Some(ChallengeStatus {
                status: ChallengeState::Active,
                ..ChallengeStatus::default()
            });
        }
        coordinator.ctx.start_team_poll();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.fetch_teams_calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.team().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn status_poll_ends_when_the_challenge_completes() {
        let api = Arc::new(FakeApi::default());
        let (coordinator, mut events) = coordinator(api.clone());
        coordinator.ctx.start_status_poll();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(matches!(
            events.try_recv().unwrap(),
            TeamEvent::SnapshotApplied(_)
        ));

        *api.status.lock().unwrap() = ChallengeStatus {
            status: ChallengeState::Completed,
            ..ChallengeStatus::default()
        };
        tokio::time::sleep(Duration::from_secs(6)).await;
        let saw_completed = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| e == TeamEvent::ChallengeCompleted);
        assert!(saw_completed);
    }
}
