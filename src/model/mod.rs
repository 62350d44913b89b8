mod activity;
mod session;
mod team;

pub use activity::{
    parse_kind, Activity, ActivityKind, ContentItem, ContentKey, ContentPayload,
    DEFAULT_UNIT_DURATION_SECS,
};
pub use session::{
    ActivityRef, AnswerSubmission, GameSnapshot, LeaderboardEntry, Participant, Session,
    SessionStatus, SubmissionResult,
};
pub use team::{
    parse_team_list, ChallengeRound, ChallengeState, ChallengeStatus, GuessRecord, Team,
    TeamMember, TeamRole, UserId,
};
