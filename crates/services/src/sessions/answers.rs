use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use exam_core::model::{Answer, AnswerError, AnswerValue, Question, QuestionId};
use tracing::warn;

/// A stored answer change, handed to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEdit {
    pub question_id: QuestionId,
    pub value: AnswerValue,
}

/// In-memory answers and review marks for one session.
///
/// This is the source of truth for what the student has entered; persistence
/// only ever catches up with it.
#[derive(Debug, Clone)]
pub struct AnswerStore {
    questions: Arc<[Question]>,
    positions: HashMap<QuestionId, usize>,
    answers: BTreeMap<QuestionId, AnswerValue>,
    marked: BTreeSet<QuestionId>,
}

impl Default for AnswerStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl AnswerStore {
    #[must_use]
    pub fn new(questions: Vec<Question>) -> Self {
        let positions = questions
            .iter()
            .enumerate()
            .map(|(pos, q)| (q.id(), pos))
            .collect();
        Self {
            questions: questions.into(),
            positions,
            answers: BTreeMap::new(),
            marked: BTreeSet::new(),
        }
    }

    /// Apply a server-side draft. Entries that no longer fit the question set
    /// are skipped; returns how many were restored.
    pub fn restore(&mut self, draft: Vec<Answer>) -> usize {
        let mut restored = 0;
        for answer in draft {
            let result = answer
                .into_value()
                .and_then(|(id, value)| self.check(id, &value).map(|()| (id, value)));
            match result {
                Ok((id, value)) => {
                    self.answers.insert(id, value);
                    restored += 1;
                }
                Err(err) => warn!(error = %err, "skipping draft answer"),
            }
        }
        restored
    }

    fn check(&self, question_id: QuestionId, value: &AnswerValue) -> Result<(), AnswerError> {
        let question = self
            .question(question_id)
            .ok_or(AnswerError::UnknownQuestion(question_id))?;
        value.validate_for(question)
    }

    /// Store `value` for a question, replacing any earlier value.
    ///
    /// Writing the same value twice leaves the store unchanged but still
    /// returns an edit, so autosave treats it as activity.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError` if the question is unknown, the value's kind does
    /// not match the question, or the option is not offered.
    pub fn set_answer(
        &mut self,
        question_id: QuestionId,
        value: AnswerValue,
    ) -> Result<AnswerEdit, AnswerError> {
        self.check(question_id, &value)?;
        self.answers.insert(question_id, value.clone());
        Ok(AnswerEdit { question_id, value })
    }

    /// Flip the review mark; returns whether the question is now marked.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::UnknownQuestion` for ids outside the exam.
    pub fn toggle_review(&mut self, question_id: QuestionId) -> Result<bool, AnswerError> {
        if !self.positions.contains_key(&question_id) {
            return Err(AnswerError::UnknownQuestion(question_id));
        }
        if self.marked.remove(&question_id) {
            return Ok(false);
        }
        self.marked.insert(question_id);
        Ok(true)
    }

    /// Questions with a non-empty answer.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|v| !v.is_empty()).count()
    }

    #[must_use]
    pub fn is_answered(&self, question_id: QuestionId) -> bool {
        self.answers.get(&question_id).is_some_and(|v| !v.is_empty())
    }

    #[must_use]
    pub fn is_marked(&self, question_id: QuestionId) -> bool {
        self.marked.contains(&question_id)
    }

    #[must_use]
    pub fn answer(&self, question_id: QuestionId) -> Option<&AnswerValue> {
        self.answers.get(&question_id)
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, AnswerValue> {
        &self.answers
    }

    #[must_use]
    pub fn marked(&self) -> &BTreeSet<QuestionId> {
        &self.marked
    }

    #[must_use]
    pub fn question(&self, question_id: QuestionId) -> Option<&Question> {
        self.positions
            .get(&question_id)
            .and_then(|pos| self.questions.get(*pos))
    }

    #[must_use]
    pub fn questions(&self) -> &Arc<[Question]> {
        &self.questions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
