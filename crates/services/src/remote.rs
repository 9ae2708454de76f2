use async_trait::async_trait;
use exam_core::model::{
    ExamId, ExamKey, QuestionPayload, QuizId, RemoteSession, ScheduleId, SessionSnapshot, TopicId,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;

use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// The remote authority the runtime synchronises with.
///
/// Question payloads arrive already decrypted; an implementation that talks to
/// an encrypting backend decrypts before returning.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// # Errors
    ///
    /// Returns `RemoteError` if the payload cannot be fetched or decoded.
    async fn fetch_payload(
        &self,
        key: &ExamKey,
        exam_id: ExamId,
    ) -> Result<QuestionPayload, RemoteError>;

    /// The active session for `(schedule_id, exam_id)`, if the server has one.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` on transport or decode failure.
    async fn active_session(
        &self,
        schedule_id: ScheduleId,
        exam_id: ExamId,
    ) -> Result<Option<RemoteSession>, RemoteError>;

    /// Best-effort progress save.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` on failure; callers log and carry on.
    async fn save_checkpoint(&self, snapshot: &SessionSnapshot) -> Result<(), RemoteError>;

    /// Final submission. Retried with the same snapshot after a failure.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` unless the server acknowledged the submission.
    async fn submit_final(&self, snapshot: &SessionSnapshot) -> Result<(), RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` on failure; callers do not block on it.
    async fn trigger_scoring(&self, schedule_id: ScheduleId) -> Result<(), RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` on failure; callers do not block on it.
    async fn complete_course(&self, topic_id: TopicId, quiz_id: QuizId)
    -> Result<(), RemoteError>;
}

/// `RemoteAuthority` over HTTP + JSON.
#[derive(Clone)]
pub struct HttpRemoteAuthority {
    client: Client,
    config: RemoteConfig,
}

impl HttpRemoteAuthority {
    /// # Errors
    ///
    /// Returns `RemoteError::Http` if the HTTP client cannot be built.
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), RemoteError> {
        let response = self
            .authorized(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ScoringRequest {
    schedule_id: ScheduleId,
}

#[derive(Debug, Serialize)]
struct CourseCompletionRequest {
    topic_id: TopicId,
    quiz_id: QuizId,
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn fetch_payload(
        &self,
        key: &ExamKey,
        exam_id: ExamId,
    ) -> Result<QuestionPayload, RemoteError> {
        let url = self.url(&format!("exams/{exam_id}/questions"));
        let response = self
            .authorized(self.client.get(url))
            .query(&[("exam_key", key.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status()));
        }
        let text = response.text().await?;
        Ok(QuestionPayload::from_json(&text)?)
    }

    async fn active_session(
        &self,
        schedule_id: ScheduleId,
        exam_id: ExamId,
    ) -> Result<Option<RemoteSession>, RemoteError> {
        let response = self
            .authorized(self.client.get(self.url("exam-sessions/active")))
            .query(&[
                ("schedule_id", schedule_id.value()),
                ("exam_id", exam_id.value()),
            ])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status()));
        }
        let text = response.text().await?;
        serde_json::from_str::<Option<RemoteSession>>(&text)
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn save_checkpoint(&self, snapshot: &SessionSnapshot) -> Result<(), RemoteError> {
        self.post_json("exam-sessions/checkpoint", snapshot).await
    }

    async fn submit_final(&self, snapshot: &SessionSnapshot) -> Result<(), RemoteError> {
        self.post_json("exam-sessions/submit", snapshot).await
    }

    async fn trigger_scoring(&self, schedule_id: ScheduleId) -> Result<(), RemoteError> {
        self.post_json("exam-schedules/score", &ScoringRequest { schedule_id })
            .await
    }

    async fn complete_course(
        &self,
        topic_id: TopicId,
        quiz_id: QuizId,
    ) -> Result<(), RemoteError> {
        self.post_json(
            "courses/complete",
            &CourseCompletionRequest { topic_id, quiz_id },
        )
        .await
    }
}
