use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::network::topic::{decode_event, ClientFrame, ServerFrame, TopicEvent, TopicKind};
use crate::network::transport::Transport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Credentials for one session connection. The resumption token is
/// injected explicitly by the caller rather than read from any ambient
/// storage.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub access_code: String,
    pub auth_token: String,
    pub resume_token: Option<String>,
}

impl SessionCredentials {
    pub fn new(access_code: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            access_code: access_code.into(),
            auth_token: auth_token.into(),
            resume_token: None,
        }
    }

    pub fn with_resume_token(mut self, token: impl Into<String>) -> Self {
        self.resume_token = Some(token.into());
        self
    }
}

/// Identifies one live subscription; needed to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionToken {
    id: Uuid,
    kind: TopicKind,
}

/// A live topic subscription. The stream ends when the subscription is
/// replaced, unsubscribed, or the manager is closed.
pub struct Subscription {
    pub token: SubscriptionToken,
    pub events: UnboundedReceiver<TopicEvent>,
}

struct TopicSlot {
    id: Uuid,
    sender: UnboundedSender<TopicEvent>,
}

struct Shared {
    credentials: SessionCredentials,
    topics: Mutex<HashMap<TopicKind, TopicSlot>>,
    outbound: Mutex<Option<UnboundedSender<String>>>,
    connected: AtomicBool,
}

impl Shared {
    fn send_frame(&self, frame: &ClientFrame) {
        let outbound = self.outbound.lock().expect("channel state poisoned");
        if let Some(sender) = outbound.as_ref() {
            match serde_json::to_string(frame) {
                Ok(text) => {
                    let _ = sender.send(text);
                }
                Err(e) => error!(error = %e, "failed to serialize frame"),
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        let mut topics = self.topics.lock().expect("channel state poisoned");
        let target = topics
            .iter()
            .find(|(kind, _)| kind.path(&self.credentials.access_code) == frame.topic)
            .map(|(kind, _)| kind.clone());

        let Some(kind) = target else {
            debug!(topic = %frame.topic, "frame for topic without subscriber");
            return;
        };

        match decode_event(&kind, frame.body) {
            Ok(Some(event)) => {
                let delivered = topics
                    .get(&kind)
                    .map(|slot| slot.sender.send(event).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    // Receiver dropped without unsubscribing.
                    topics.remove(&kind);
                }
            }
            Ok(None) => debug!(topic = %frame.topic, "frame carried no event"),
            Err(e) => warn!(topic = %frame.topic, error = %e, "dropping invalid frame body"),
        }
    }

    fn broadcast_session_lost(&self) {
        let topics = self.topics.lock().expect("channel state poisoned");
        for slot in topics.values() {
            let _ = slot.sender.send(TopicEvent::SessionLost);
        }
    }
}

/// Owns one multiplexed duplex connection per session.
///
/// At most one live subscription exists per topic kind; subscribing to a
/// held kind replaces the previous subscription. On disconnect the
/// manager retries with a fixed back-off and re-issues every held
/// subscription; after exhausting its attempts it delivers
/// [`TopicEvent::SessionLost`] to every subscriber and stops.
pub struct ChannelManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn open(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        credentials: SessionCredentials,
    ) -> Self {
        let shared = Arc::new(Shared {
            credentials,
            topics: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            connected: AtomicBool::new(false),
        });

        let task = tokio::spawn(run_connection(config, transport, shared.clone()));
        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Open a typed event stream for a topic. Replaces any previous
    /// subscription for the same kind.
    pub fn subscribe(&self, kind: TopicKind) -> Result<Subscription, SyncError> {
        let (sender, events) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        {
            let mut topics = self.shared.topics.lock().expect("channel state poisoned");
            if topics.insert(kind.clone(), TopicSlot { id, sender }).is_some() {
                debug!(?kind, "replacing existing subscription");
            }
        }
        self.shared.send_frame(&ClientFrame::Subscribe {
            topic: kind.path(&self.shared.credentials.access_code),
        });
        Ok(Subscription {
            token: SubscriptionToken { id, kind },
            events,
        })
    }

    /// Release one subscription. A token whose subscription was already
    /// replaced is a no-op.
    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        let removed = {
            let mut topics = self.shared.topics.lock().expect("channel state poisoned");
            match topics.get(&token.kind) {
                Some(slot) if slot.id == token.id => {
                    topics.remove(&token.kind);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.shared.send_frame(&ClientFrame::Unsubscribe {
                topic: token.kind.path(&self.shared.credentials.access_code),
            });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Release every subscription and the transport.
    pub fn close(&self) {
        if let Some(task) = self.task.lock().expect("channel state poisoned").take() {
            task.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared
            .outbound
            .lock()
            .expect("channel state poisoned")
            .take();
        self.shared
            .topics
            .lock()
            .expect("channel state poisoned")
            .clear();
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(config: SyncConfig, transport: Arc<dyn Transport>, shared: Arc<Shared>) {
    let mut failures: u32 = 0;
    loop {
        match transport.connect().await {
            Ok(connection) => {
                failures = 0;
                shared.connected.store(true, Ordering::SeqCst);
                *shared.outbound.lock().expect("channel state poisoned") =
                    Some(connection.outbound);

                shared.send_frame(&ClientFrame::Authenticate {
                    access_code: shared.credentials.access_code.clone(),
                    token: shared.credentials.auth_token.clone(),
                    resume: shared.credentials.resume_token.clone(),
                });
                resubscribe_all(&shared);

                let mut inbound = connection.inbound;
                while let Some(text) = inbound.recv().await {
                    shared.dispatch(&text);
                }

                shared.connected.store(false, Ordering::SeqCst);
                shared.outbound.lock().expect("channel state poisoned").take();
                warn!("transport disconnected, scheduling reconnect");
            }
            Err(e) => {
                failures += 1;
                warn!(attempt = failures, error = %e, "connection attempt failed");
                if failures >= config.max_reconnect_attempts {
                    error!("reconnect attempts exhausted, session lost");
                    shared.broadcast_session_lost();
                    return;
                }
            }
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

fn resubscribe_all(shared: &Shared) {
    let paths: Vec<String> = {
        let topics = shared.topics.lock().expect("channel state poisoned");
        topics
            .keys()
            .map(|kind| kind.path(&shared.credentials.access_code))
            .collect()
    };
    for topic in paths {
        info!(%topic, "re-issuing subscription");
        shared.send_frame(&ClientFrame::Subscribe { topic });
    }
}
