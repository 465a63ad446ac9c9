use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{OptionId, QuestionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question {0} has an empty prompt")]
    EmptyPrompt(QuestionId),

    #[error("multiple-choice question {0} needs at least two options")]
    TooFewOptions(QuestionId),

    #[error("subjective question {0} cannot carry options")]
    UnexpectedOptions(QuestionId),

    #[error("question {question_id} repeats option {option_id}")]
    DuplicateOption {
        question_id: QuestionId,
        option_id: OptionId,
    },
}

//
// ─── KIND ──────────────────────────────────────────────────────────────────────
//

/// How a question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    MultipleChoice,
    Subjective,
}

impl QuestionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple-choice",
            Self::Subjective => "subjective",
        }
    }
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    pub text: String,
}

impl QuestionOption {
    #[must_use]
    pub fn new(id: impl Into<OptionId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A question as loaded for a session. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    id: QuestionId,
    index: u32,
    #[serde(rename = "type")]
    kind: QuestionKind,
    prompt: String,
    max_marks: u32,
    options: Vec<QuestionOption>,
}

impl Question {
    /// Build a multiple-choice question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` for an empty prompt, fewer than two options, or
    /// repeated option ids.
    pub fn multiple_choice(
        id: QuestionId,
        index: u32,
        prompt: impl Into<String>,
        max_marks: u32,
        options: Vec<QuestionOption>,
    ) -> Result<Self, QuestionError> {
        Self::new(id, index, QuestionKind::MultipleChoice, prompt, max_marks, options)
    }

    /// Build a free-text question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::EmptyPrompt` if the prompt is blank.
    pub fn subjective(
        id: QuestionId,
        index: u32,
        prompt: impl Into<String>,
        max_marks: u32,
    ) -> Result<Self, QuestionError> {
        Self::new(id, index, QuestionKind::Subjective, prompt, max_marks, Vec::new())
    }

    /// Validate and build a question of any kind.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` when the option list does not fit the kind.
    pub fn new(
        id: QuestionId,
        index: u32,
        kind: QuestionKind,
        prompt: impl Into<String>,
        max_marks: u32,
        options: Vec<QuestionOption>,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt(id));
        }

        match kind {
            QuestionKind::MultipleChoice => {
                if options.len() < 2 {
                    return Err(QuestionError::TooFewOptions(id));
                }
                let mut seen = HashSet::with_capacity(options.len());
                for option in &options {
                    if !seen.insert(&option.id) {
                        return Err(QuestionError::DuplicateOption {
                            question_id: id,
                            option_id: option.id.clone(),
                        });
                    }
                }
            }
            QuestionKind::Subjective => {
                if !options.is_empty() {
                    return Err(QuestionError::UnexpectedOptions(id));
                }
            }
        }

        Ok(Self {
            id,
            index,
            kind,
            prompt,
            max_marks,
            options,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn max_marks(&self) -> u32 {
        self.max_marks
    }

    #[must_use]
    pub fn options(&self) -> &[QuestionOption] {
        &self.options
    }

    #[must_use]
    pub fn has_option(&self, option: &OptionId) -> bool {
        self.options.iter().any(|o| &o.id == option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<QuestionOption> {
        vec![QuestionOption::new("a", "Red"), QuestionOption::new("b", "Blue")]
    }

    #[test]
    fn multiple_choice_requires_two_options() {
        let err = Question::multiple_choice(
            QuestionId::new(1),
            0,
            "Pick one",
            2,
            vec![QuestionOption::new("a", "Only")],
        )
        .unwrap_err();
        assert_eq!(err, QuestionError::TooFewOptions(QuestionId::new(1)));
    }

    #[test]
    fn duplicate_option_ids_are_rejected() {
        let err = Question::multiple_choice(
            QuestionId::new(1),
            0,
            "Pick one",
            2,
            vec![QuestionOption::new("a", "x"), QuestionOption::new("a", "y")],
        )
        .unwrap_err();
        assert!(matches!(err, QuestionError::DuplicateOption { .. }));
    }

    #[test]
    fn subjective_rejects_options() {
        let err = Question::new(
            QuestionId::new(2),
            1,
            QuestionKind::Subjective,
            "Explain",
            5,
            options(),
        )
        .unwrap_err();
        assert_eq!(err, QuestionError::UnexpectedOptions(QuestionId::new(2)));
    }

    #[test]
    fn serializes_kind_as_type_field() {
        let q = Question::multiple_choice(QuestionId::new(3), 0, "Sky?", 1, options()).unwrap();
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["type"], "multiple-choice");
        assert_eq!(json["maxMarks"], 1);
        assert!(q.has_option(&OptionId::new("b")));
        assert!(!q.has_option(&OptionId::new("z")));
    }
}
