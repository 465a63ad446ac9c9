use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    Answer, ExamId, Question, QuestionError, QuestionId, QuestionKind, QuestionOption,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by backend adapters.
///
/// Transient variants are retried by the session engine; everything else is a
/// terminal answer from the server and is surfaced to the student.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out")]
    Timeout,

    #[error("backend unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("rejected by server: {reason}")]
    Rejected { status: Option<u16>, reason: String },

    #[error("not found")]
    NotFound,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout | Self::Unavailable { .. }
        )
    }

    /// Human-readable reason: the server's own message for a rejection,
    /// the error text otherwise.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Rejected { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            status: None,
            reason: reason.into(),
        }
    }
}

/// Persisted shape for a question as served by the exam API.
///
/// Kept apart from the domain `Question` so that malformed payloads are caught
/// by validation instead of leaking into a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub index: u32,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default)]
    pub max_marks: u32,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

impl QuestionRecord {
    #[must_use]
    pub fn from_question(question: &Question) -> Self {
        Self {
            id: question.id(),
            index: question.index(),
            kind: question.kind(),
            prompt: question.prompt().to_owned(),
            max_marks: question.max_marks(),
            options: question.options().to_vec(),
        }
    }

    /// Convert the record into a domain `Question`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the record fails validation.
    pub fn into_question(self) -> Result<Question, QuestionError> {
        Question::new(
            self.id,
            self.index,
            self.kind,
            self.prompt,
            self.max_marks,
            self.options,
        )
    }
}

/// Server acknowledgment of a final submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub submitted_at: DateTime<Utc>,
}

/// Source of the question set and any server-side draft.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Fetch the ordered question list for an exam.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the request fails or the payload is invalid.
    async fn fetch_questions(&self, exam_id: ExamId) -> Result<Vec<Question>, BackendError>;

    /// Fetch answers saved by an earlier visit to the same exam.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the request fails.
    async fn fetch_draft(&self, exam_id: ExamId) -> Result<Vec<Answer>, BackendError>;
}

/// Durable store for answers and the final submission.
#[async_trait]
pub trait AnswerPersistence: Send + Sync {
    /// Persist a batch of answers. Later calls overwrite earlier values per question.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the batch was not stored.
    async fn save_answers(&self, exam_id: ExamId, answers: &[Answer]) -> Result<(), BackendError>;

    /// Finalize the exam for grading.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the submission was not accepted.
    async fn submit_exam(&self, exam_id: ExamId) -> Result<SubmitReceipt, BackendError>;
}

/// Aggregates the backend collaborators behind trait objects for easy swapping.
#[derive(Clone)]
pub struct Backend {
    pub questions: Arc<dyn QuestionSource>,
    pub answers: Arc<dyn AnswerPersistence>,
}

impl Backend {
    #[must_use]
    pub fn in_memory(repo: crate::memory::InMemoryBackend) -> Self {
        let questions: Arc<dyn QuestionSource> = Arc::new(repo.clone());
        let answers: Arc<dyn AnswerPersistence> = Arc::new(repo);
        Self { questions, answers }
    }

    /// Build an HTTP-backed backend.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unreachable` if the HTTP client cannot be built.
    pub fn http(config: crate::http::HttpBackendConfig) -> Result<Self, BackendError> {
        let client = crate::http::HttpBackend::new(config)?;
        let questions: Arc<dyn QuestionSource> = Arc::new(client.clone());
        let answers: Arc<dyn AnswerPersistence> = Arc::new(client);
        Ok(Self { questions, answers })
    }
}
