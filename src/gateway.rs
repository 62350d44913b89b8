use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{
    parse_team_list, Activity, AnswerSubmission, ChallengeStatus, GameSnapshot, SubmissionResult,
    Team, UserId,
};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

/// Request/response surface of the REST collaborator, as consumed by the
/// synchronization core. Stateless; every error surfaces as
/// [`SyncError::RequestFailed`] and must not take the session down.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Fetch the authoritative current-session/content snapshot.
    async fn fetch_game(&self) -> Result<GameSnapshot, SyncError>;

    /// Fetch a single activity by id.
    async fn fetch_activity(&self, activity_id: &str) -> Result<Activity, SyncError>;

    /// Submit an answer for the current content unit.
    async fn submit_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<SubmissionResult, SyncError>;

    /// Ask the server to decide whether the content unit at
    /// `content_index` has ended. The decision arrives asynchronously on
    /// the `content` topic, never in this response.
    async fn request_advance(&self, activity_id: &str, content_index: usize)
        -> Result<(), SyncError>;

    /// Fetch the session's team list.
    async fn fetch_teams(&self) -> Result<Vec<Team>, SyncError>;

    /// Fetch the current team-challenge status snapshot.
    async fn fetch_challenge_status(&self) -> Result<ChallengeStatus, SyncError>;

    /// Idempotent team creation; a conflict means teams already exist.
    async fn create_teams(&self, auto_assign: bool) -> Result<(), SyncError>;

    /// Submit a guess on behalf of the calling guesser.
    async fn submit_guess(&self, team_id: &str, guess: &str) -> Result<(), SyncError>;

    /// Re-assign the drawer role within a team.
    async fn switch_drawer(&self, team_id: &str, new_drawer_id: &UserId) -> Result<(), SyncError>;
}

/// HTTP implementation of [`SessionApi`] against the backend's REST
/// surface. The bearer credential is attached to every call.
pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: Url,
    access_code: String,
    auth_token: String,
    user_id: Option<UserId>,
}

impl HttpSessionApi {
    pub fn new(
        config: &SyncConfig,
        access_code: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SyncError::request_failed(format!("invalid base url: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            access_code: access_code.into(),
            auth_token: auth_token.into(),
            user_id: None,
        })
    }

    /// Attach the caller's id; sent as `X-Student-Id` where the backend
    /// expects it.
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    fn session_url(&self, suffix: &str) -> Result<Url, SyncError> {
        self.url(&format!("api/sessions/{}/{suffix}", self.access_code))
    }

    fn url(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::request_failed(format!("invalid endpoint {path}: {e}")))
    }

    async fn get_json(&self, url: Url) -> Result<Value, SyncError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| SyncError::request_failed(e.to_string()))?;
        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::request_failed(format!("invalid response body: {e}")))
    }

    async fn post_json(&self, url: Url, body: &Value) -> Result<Response, SyncError> {
        let mut request = self
            .client
            .post(url)
            .bearer_auth(&self.auth_token)
            .json(body);
        if let Some(user_id) = &self.user_id {
            request = request.header("X-Student-Id", user_id.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::request_failed(e.to_string()))?;
        Self::checked(response).await
    }

    async fn checked(response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = if status == StatusCode::CONFLICT {
            "already exists".to_string()
        } else {
            let body = response.text().await.unwrap_or_default();
            format!("status {status}: {body}")
        };
        Err(SyncError::RequestFailed { reason })
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn fetch_game(&self) -> Result<GameSnapshot, SyncError> {
        let value = self.get_json(self.session_url("game")?).await?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::request_failed(format!("invalid game snapshot: {e}")))
    }

    async fn fetch_activity(&self, activity_id: &str) -> Result<Activity, SyncError> {
        let url = self.url(&format!(
            "api/activities/session/{}/activity/{activity_id}",
            self.access_code
        ))?;
        let value = self.get_json(url).await?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::request_failed(format!("invalid activity: {e}")))
    }

    async fn submit_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<SubmissionResult, SyncError> {
        let body = serde_json::to_value(submission)
            .map_err(|e| SyncError::request_failed(e.to_string()))?;
        let response = self.post_json(self.session_url("submit")?, &body).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::request_failed(format!("invalid submission result: {e}")))
    }

    async fn request_advance(
        &self,
        activity_id: &str,
        content_index: usize,
    ) -> Result<(), SyncError> {
        debug!(activity_id, content_index, "requesting content advance");
        let url = self.session_url(&format!("activity/{activity_id}/advance-content"))?;
        self.post_json(url, &json!({ "currentContentIndex": content_index }))
            .await?;
        Ok(())
    }

    async fn fetch_teams(&self) -> Result<Vec<Team>, SyncError> {
        let value = self.get_json(self.session_url("teams")?).await?;
        Ok(parse_team_list(value))
    }

    async fn fetch_challenge_status(&self) -> Result<ChallengeStatus, SyncError> {
        let value = self.get_json(self.session_url("teamchallenge/status")?).await?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::request_failed(format!("invalid challenge status: {e}")))
    }

    async fn create_teams(&self, auto_assign: bool) -> Result<(), SyncError> {
        let mut url = self.session_url("teams")?;
        if auto_assign {
            url.query_pairs_mut().append_pair("autoAssign", "true");
        }
        self.post_json(url, &json!({})).await?;
        Ok(())
    }

    async fn submit_guess(&self, team_id: &str, guess: &str) -> Result<(), SyncError> {
        let url = self.session_url("teamchallenge/guess")?;
        self.post_json(url, &json!({ "teamId": team_id, "guess": guess }))
            .await?;
        Ok(())
    }

    async fn switch_drawer(&self, team_id: &str, new_drawer_id: &UserId) -> Result<(), SyncError> {
        let url = self.session_url("teamchallenge/switch-drawer")?;
        self.post_json(
            url,
            &json!({ "teamId": team_id, "newDrawerId": new_drawer_id.as_str() }),
        )
        .await?;
        Ok(())
    }
}
