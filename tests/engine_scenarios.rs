//! End-to-end engine scenarios against a scripted transport and a fake
//! REST collaborator, under virtual time.

use async_trait::async_trait;
use quizweb_session::network::TransportConnection;
use quizweb_session::prelude::*;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

struct ScriptedTransport {
    connections: Mutex<VecDeque<TransportConnection>>,
}

struct Remote {
    to_client: UnboundedSender<String>,
    #[allow(dead_code)]
    from_client: UnboundedReceiver<String>,
}

fn scripted(count: usize) -> (ScriptedTransport, Vec<Remote>) {
    let mut connections = VecDeque::new();
    let mut remotes = Vec::new();
    for _ in 0..count {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        connections.push_back(TransportConnection {
            outbound: out_tx,
            inbound: in_rx,
        });
        remotes.push(Remote {
            to_client: in_tx,
            from_client: out_rx,
        });
    }
    (
        ScriptedTransport {
            connections: Mutex::new(connections),
        },
        remotes,
    )
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<TransportConnection, SyncError> {
        self.connections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(SyncError::TransportDisconnected)
    }
}

#[derive(Default)]
struct FakeApi {
    snapshot: Mutex<Value>,
    fetch_calls: AtomicUsize,
    advances: Mutex<Vec<(String, usize)>>,
}

impl FakeApi {
    fn set_snapshot(&self, snapshot: Value) {
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

#[async_trait]
impl SessionApi for FakeApi {
    async fn fetch_game(&self) -> Result<GameSnapshot, SyncError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let value = self.snapshot.lock().unwrap().clone();
        serde_json::from_value(value).map_err(|e| SyncError::request_failed(e.to_string()))
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
        activity_id: &str,
        content_index: usize,
    ) -> Result<(), SyncError> {
        self.advances
            .lock()
            .unwrap()
            .push((activity_id.to_string(), content_index));
        Ok(())
    }

    async fn fetch_teams(&self) -> Result<Vec<Team>, SyncError> {
        Ok(Vec::new())
    }

    async fn fetch_challenge_status(&self) -> Result<ChallengeStatus, SyncError> {
        Ok(ChallengeStatus::default())
    }

    async fn create_teams(&self, _auto_assign: bool) -> Result<(), SyncError> {
        Ok(())
    }

    async fn submit_guess(&self, _team_id: &str, _guess: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn switch_drawer(&self, _team_id: &str, _new_drawer_id: &UserId) -> Result<(), SyncError> {
        Ok(())
    }
}

fn frame(topic: String, body: Value) -> String {
    json!({ "topic": topic, "body": body }).to_string()
}

fn quiz_activity(id: &str, items: usize, duration: u64) -> Value {
    let content_items: Vec<_> = (0..items)
        .map(|i| json!({"contentId": format!("c{i}"), "data": [], "duration": duration}))
        .collect();
    json!({
        "id": id,
        "type": "MULTIPLE_CHOICE",
        "title": "Warm-up",
        "contentItems": content_items
    })
}

struct Harness {
    engine: SessionEngine,
    channels: Arc<ChannelManager>,
    api: Arc<FakeApi>,
    remotes: Vec<Remote>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn start(initial_snapshot: Value) -> Harness {
    init_tracing();
    let (transport, remotes) = scripted(1);
    let config = SyncConfig::default();
    let channels = Arc::new(ChannelManager::open(
        config.clone(),
        Arc::new(transport),
        SessionCredentials::new("ABC123", "token"),
    ));
    let api = Arc::new(FakeApi::default());
    api.set_snapshot(initial_snapshot);
    let engine = SessionEngine::start(config, api.clone(), channels.clone()).unwrap();
    Harness {
        engine,
        channels,
        api,
        remotes,
    }
}

impl Harness {
    fn push(&self, kind: TopicKind, body: Value) {
        self.remotes[0]
            .to_client
            .send(frame(kind.path("ABC123"), body))
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn lobby_to_active_to_completed_lifecycle() {
    let harness = start(json!({ "title": "Quiz Night", "status": "LOBBY" }));
    let mut view = harness.engine.view();

    view.wait_for(|v| v.session_status == SessionStatus::Lobby)
        .await
        .unwrap();
    assert_eq!(view.borrow().phase, Phase::Loading);

    // The session goes live; the engine refetches and starts the unit.
    harness.api.set_snapshot(json!({
        "status": "ACTIVE",
        "currentActivity": quiz_activity("a1", 1, 30),
        "currentContentIndex": 0
    }));
    harness.push(TopicKind::Status, json!("ACTIVE"));

    view.wait_for(|v| v.phase == Phase::Active).await.unwrap();
    {
        let current = view.borrow();
        assert_eq!(current.activity.as_ref().unwrap().id, "a1");
        assert_eq!(current.content_index, 0);
    }
    let remaining = harness.engine.remaining();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(*remaining.borrow() > 0);

    harness.push(
        TopicKind::Leaderboard,
        json!([{"userId": "u1", "displayName": "Ada", "score": 10}]),
    );
    view.wait_for(|v| !v.leaderboard.is_empty()).await.unwrap();

    harness.push(TopicKind::Status, json!("COMPLETED"));
    view.wait_for(|v| v.phase == Phase::Completed).await.unwrap();

    // Teardown: countdown stopped, subscriptions released.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!harness.channels.is_connected());
    assert_eq!(*remaining.borrow(), 0);
}

#[tokio::test(start_paused = true)]
async fn expiry_requests_one_advance_and_the_push_moves_the_unit() {
    let harness = start(json!({
        "status": "ACTIVE",
        "currentActivity": quiz_activity("a1", 3, 5),
        "currentContentIndex": 0
    }));
    let mut view = harness.engine.view();
    view.wait_for(|v| v.phase == Phase::Active).await.unwrap();

    // The unit runs out locally; exactly one advance request goes out.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        harness.api.advances.lock().unwrap().clone(),
        vec![("a1".to_string(), 0)]
    );

    // The authoritative advance arrives and restarts the countdown.
    harness.push(
        TopicKind::Content,
        json!({"status": "advanced_content", "activityId": "a1", "currentIndex": 1}),
    );
    view.wait_for(|v| v.content_index == 1).await.unwrap();
    assert_eq!(view.borrow().phase, Phase::Active);

    // A duplicate of the same push changes nothing.
    harness.push(
        TopicKind::Content,
        json!({"status": "advanced_content", "activityId": "a1", "currentIndex": 1}),
    );

    // The next unit gets its own single request.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        harness.api.advances.lock().unwrap().clone(),
        vec![("a1".to_string(), 0), ("a1".to_string(), 1)]
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_advance_request_falls_back_to_a_refetch() {
    let harness = start(json!({
        "status": "ACTIVE",
        "currentActivity": quiz_activity("a1", 2, 5),
        "currentContentIndex": 0
    }));
    let mut view = harness.engine.view();
    view.wait_for(|v| v.phase == Phase::Active).await.unwrap();
    let initial_fetches = harness.api.fetch_calls.load(Ordering::SeqCst);

    // Expiry at 5s, advance request goes out, the server never pushes.
    harness.api.set_snapshot(json!({
        "status": "ACTIVE",
        "currentActivity": quiz_activity("a1", 2, 5),
        "currentContentIndex": 1
    }));
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert!(harness.api.fetch_calls.load(Ordering::SeqCst) > initial_fetches);
    view.wait_for(|v| v.content_index == 1).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn close_stops_the_snapshot_retry_loop() {
    // An undecodable snapshot keeps the fetch retry loop alive.
    let harness = start(json!("not a snapshot"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = harness.api.fetch_calls.load(Ordering::SeqCst);
    assert!(before >= 1);

    harness.engine.close();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.api.fetch_calls.load(Ordering::SeqCst), before);
}

#[tokio::test(start_paused = true)]
async fn exhausted_transport_shuts_the_engine_down() {
    let (transport, remotes) = scripted(0);
    drop(remotes);
    let config = SyncConfig {
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_attempts: 2,
        ..SyncConfig::default()
    };
    let channels = Arc::new(ChannelManager::open(
        config.clone(),
        Arc::new(transport),
        SessionCredentials::new("ABC123", "token"),
    ));
    let api = Arc::new(FakeApi::default());
    api.set_snapshot(json!({ "status": "LOBBY" }));
    let engine = SessionEngine::start(config, api, channels.clone()).unwrap();
    let view = engine.view();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!channels.is_connected());
    // The engine saw the lost session and stopped publishing.
    assert_ne!(view.borrow().phase, Phase::Completed);
    engine.close();
}
