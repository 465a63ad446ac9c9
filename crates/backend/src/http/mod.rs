mod mapping;

use std::env;

use async_trait::async_trait;
use exam_core::model::{Answer, ExamId, Question};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::repository::{
    AnswerPersistence, BackendError, QuestionRecord, QuestionSource, SubmitReceipt,
};
use mapping::{map_status, map_transport_error};

#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl HttpBackendConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
        }
    }

    /// Read `EXAM_API_BASE_URL` and the optional `EXAM_API_TOKEN`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("EXAM_API_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let token = env::var("EXAM_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        Some(Self { base_url, token })
    }
}

/// REST client for the exam API.
///
/// Routes: `GET /exams/{id}/questions`, `GET /exams/{id}/draft`,
/// `PUT /exams/{id}/answers`, `POST /exams/{id}/submit`.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: HttpBackendConfig,
}

#[derive(Debug, Serialize)]
struct SaveAnswersRequest<'a> {
    answers: &'a [Answer],
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns `BackendError::Unreachable` if the TLS client cannot be initialised.
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, exam_id: ExamId, path: &str) -> String {
        format!(
            "{}/exams/{exam_id}/{path}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        response.json().await.map_err(|e| map_transport_error(&e))
    }
}

#[async_trait]
impl QuestionSource for HttpBackend {
    async fn fetch_questions(&self, exam_id: ExamId) -> Result<Vec<Question>, BackendError> {
        let response = self
            .send(self.client.get(self.url(exam_id, "questions")))
            .await?;
        let records: Vec<QuestionRecord> = Self::json(response).await?;

        let mut questions = records
            .into_iter()
            .map(QuestionRecord::into_question)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        questions.sort_by_key(Question::index);
        Ok(questions)
    }

    async fn fetch_draft(&self, exam_id: ExamId) -> Result<Vec<Answer>, BackendError> {
        match self.send(self.client.get(self.url(exam_id, "draft"))).await {
            Ok(response) => Self::json(response).await,
            // No draft yet is the normal first-visit case.
            Err(BackendError::NotFound) => Ok(Vec::new()),
            Err(err) => {
                warn!(%exam_id, error = %err, "draft fetch failed");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl AnswerPersistence for HttpBackend {
    async fn save_answers(&self, exam_id: ExamId, answers: &[Answer]) -> Result<(), BackendError> {
        let request = self
            .client
            .put(self.url(exam_id, "answers"))
            .json(&SaveAnswersRequest { answers });
        self.send(request).await?;
        Ok(())
    }

    async fn submit_exam(&self, exam_id: ExamId) -> Result<SubmitReceipt, BackendError> {
        let response = self
            .send(self.client.post(self.url(exam_id, "submit")))
            .await?;
        Self::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_trims_trailing_slash() {
        let backend = HttpBackend::new(HttpBackendConfig::new("https://exams.test/api/")).unwrap();
        assert_eq!(
            backend.url(ExamId::new(12), "answers"),
            "https://exams.test/api/exams/12/answers"
        );
    }

    #[test]
    fn save_request_wraps_answers() {
        let answers = vec![Answer {
            question_id: exam_core::model::QuestionId::new(1),
            response_text: None,
            response_option: Some("b".into()),
        }];
        let json = serde_json::to_string(&SaveAnswersRequest { answers: &answers }).unwrap();
        assert_eq!(json, r#"{"answers":[{"questionId":1,"responseOption":"b"}]}"#);
    }
}
