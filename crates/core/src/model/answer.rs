use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{OptionId, QuestionId};
use crate::model::question::{Question, QuestionKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("question {question_id} expects a {expected} answer, got {found}")]
    TypeMismatch {
        question_id: QuestionId,
        expected: QuestionKind,
        found: QuestionKind,
    },

    #[error("question {question_id} has no option {option_id}")]
    UnknownOption {
        question_id: QuestionId,
        option_id: OptionId,
    },

    #[error("answer for question {0} sets both or neither of text and option")]
    Malformed(QuestionId),
}

/// A student's response to one question.
///
/// An empty `Text` is a cleared answer, which is distinct from a question that
/// was never touched (no value at all).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnswerValue {
    Text(String),
    Option(OptionId),
}

impl AnswerValue {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn option(value: impl Into<OptionId>) -> Self {
        Self::Option(value.into())
    }

    /// The question kind this value answers.
    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        match self {
            Self::Text(_) => QuestionKind::Subjective,
            Self::Option(_) => QuestionKind::MultipleChoice,
        }
    }

    /// True when the value counts as "not answered" (a cleared text box).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Option(_) => false,
        }
    }

    /// Check that this value may be stored against `question`.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::TypeMismatch` if the kinds differ, or
    /// `AnswerError::UnknownOption` if the option is not offered.
    pub fn validate_for(&self, question: &Question) -> Result<(), AnswerError> {
        if self.kind() != question.kind() {
            return Err(AnswerError::TypeMismatch {
                question_id: question.id(),
                expected: question.kind(),
                found: self.kind(),
            });
        }
        match self {
            Self::Option(option) if !question.has_option(option) => {
                Err(AnswerError::UnknownOption {
                    question_id: question.id(),
                    option_id: option.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Wire shape of an answer: exactly one of `responseText`/`responseOption`.
///
/// Unset fields are omitted rather than sent as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: QuestionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_option: Option<OptionId>,
}

impl Answer {
    #[must_use]
    pub fn new(question_id: QuestionId, value: &AnswerValue) -> Self {
        match value {
            AnswerValue::Text(text) => Self {
                question_id,
                response_text: Some(text.clone()),
                response_option: None,
            },
            AnswerValue::Option(option) => Self {
                question_id,
                response_text: None,
                response_option: Some(option.clone()),
            },
        }
    }

    /// Convert the wire record back into a domain value.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::Malformed` unless exactly one field is set.
    pub fn into_value(self) -> Result<(QuestionId, AnswerValue), AnswerError> {
        match (self.response_text, self.response_option) {
            (Some(text), None) => Ok((self.question_id, AnswerValue::Text(text))),
            (None, Some(option)) => Ok((self.question_id, AnswerValue::Option(option))),
            _ => Err(AnswerError::Malformed(self.question_id)),
        }
    }
}
