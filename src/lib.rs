//! Client-side synchronization engine for live quiz sessions.
//!
//! The engine keeps a participant's view of a hosted session converged
//! with the server over one multiplexed pub/sub connection plus a REST
//! collaborator: activity and content progression, the per-unit
//! countdown, answer submission, and the team-challenge reconciliation
//! loop.

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod model;
pub mod network;
pub mod progression;
pub mod team;
pub mod timer;

pub mod prelude {
    pub use crate::config::SyncConfig;
    pub use crate::engine::EngineView;
    pub use crate::engine::SessionEngine;
    pub use crate::error::SyncError;
    pub use crate::gateway::HttpSessionApi;
    pub use crate::gateway::SessionApi;
    pub use crate::model::Activity;
    pub use crate::model::ActivityKind;
    pub use crate::model::AnswerSubmission;
    pub use crate::model::ChallengeState;
    pub use crate::model::ChallengeStatus;
    pub use crate::model::ContentItem;
    pub use crate::model::ContentKey;
    pub use crate::model::ContentPayload;
    pub use crate::model::GameSnapshot;
    pub use crate::model::LeaderboardEntry;
    pub use crate::model::SessionStatus;
    pub use crate::model::SubmissionResult;
    pub use crate::model::Team;
    pub use crate::model::TeamRole;
    pub use crate::model::UserId;
    pub use crate::network::ChannelManager;
    pub use crate::network::SessionCredentials;
    pub use crate::network::TopicEvent;
    pub use crate::network::TopicKind;
    pub use crate::network::Transport;
    pub use crate::network::WebSocketTransport;
    pub use crate::progression::Phase;
    pub use crate::team::TeamCoordinator;
    pub use crate::team::TeamEvent;
    pub use crate::timer::ContentTimer;
}
