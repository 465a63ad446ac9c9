use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::Clock;
use exam_core::model::{Answer, ExamId, Question, QuestionId};

use crate::repository::{AnswerPersistence, BackendError, QuestionSource, SubmitReceipt};

#[derive(Default)]
struct ExamEntry {
    questions: Vec<Question>,
    saved: BTreeMap<QuestionId, Answer>,
    submitted_at: Option<DateTime<Utc>>,
    closed: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    exams: HashMap<ExamId, ExamEntry>,
    unreachable: bool,
    save_failures: VecDeque<BackendError>,
    submit_failures: VecDeque<BackendError>,
    save_log: Vec<Vec<Answer>>,
    submit_calls: u32,
}

/// In-memory exam backend for tests, demos and offline prototyping.
///
/// Failures can be injected per call (`fail_next_saves`, `fail_next_submit`),
/// the whole backend can be made unreachable, and an exam can be closed so the
/// server starts rejecting writes.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    clock: Clock,
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, BackendError> {
        self.state
            .lock()
            .map_err(|e| BackendError::Unreachable(e.to_string()))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        // A poisoned lock only means another test thread panicked mid-update.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn insert_exam(&self, exam_id: ExamId, questions: Vec<Question>) {
        self.with_state(|state| {
            state.exams.entry(exam_id).or_default().questions = questions;
        });
    }

    /// Seed answers as if saved by an earlier visit.
    pub fn seed_draft(&self, exam_id: ExamId, answers: Vec<Answer>) {
        self.with_state(|state| {
            let entry = state.exams.entry(exam_id).or_default();
            for answer in answers {
                entry.saved.insert(answer.question_id, answer);
            }
        });
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.with_state(|state| state.unreachable = !reachable);
    }

    pub fn fail_next_saves(&self, error: BackendError, times: usize) {
        self.with_state(|state| {
            state
                .save_failures
                .extend(std::iter::repeat_n(error, times));
        });
    }

    pub fn fail_next_submit(&self, error: BackendError) {
        self.with_state(|state| state.submit_failures.push_back(error));
    }

    /// Close the exam server-side; later saves and submissions are rejected.
    pub fn close_exam(&self, exam_id: ExamId, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_state(|state| {
            state.exams.entry(exam_id).or_default().closed = Some(reason);
        });
    }

    #[must_use]
    pub fn save_log(&self) -> Vec<Vec<Answer>> {
        self.with_state(|state| state.save_log.clone())
    }

    #[must_use]
    pub fn save_calls(&self) -> usize {
        self.with_state(|state| state.save_log.len())
    }

    #[must_use]
    pub fn submit_calls(&self) -> u32 {
        self.with_state(|state| state.submit_calls)
    }

    #[must_use]
    pub fn saved_answer(&self, exam_id: ExamId, question_id: QuestionId) -> Option<Answer> {
        self.with_state(|state| {
            state
                .exams
                .get(&exam_id)
                .and_then(|entry| entry.saved.get(&question_id).cloned())
        })
    }

    #[must_use]
    pub fn submitted_at(&self, exam_id: ExamId) -> Option<DateTime<Utc>> {
        self.with_state(|state| state.exams.get(&exam_id).and_then(|e| e.submitted_at))
    }
}

fn ensure_reachable(state: &MemoryState) -> Result<(), BackendError> {
    if state.unreachable {
        return Err(BackendError::Unreachable("in-memory backend offline".into()));
    }
    Ok(())
}

fn open_exam(state: &mut MemoryState, exam_id: ExamId) -> Result<&mut ExamEntry, BackendError> {
    let entry = state.exams.get_mut(&exam_id).ok_or(BackendError::NotFound)?;
    if let Some(reason) = &entry.closed {
        return Err(BackendError::rejected(reason.clone()));
    }
    Ok(entry)
}

#[async_trait]
impl QuestionSource for InMemoryBackend {
    async fn fetch_questions(&self, exam_id: ExamId) -> Result<Vec<Question>, BackendError> {
        let guard = self.state()?;
        ensure_reachable(&guard)?;
        let entry = guard.exams.get(&exam_id).ok_or(BackendError::NotFound)?;
        let mut questions = entry.questions.clone();
        questions.sort_by_key(Question::index);
        Ok(questions)
    }

    async fn fetch_draft(&self, exam_id: ExamId) -> Result<Vec<Answer>, BackendError> {
        let guard = self.state()?;
        ensure_reachable(&guard)?;
        Ok(guard
            .exams
            .get(&exam_id)
            .map(|entry| entry.saved.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AnswerPersistence for InMemoryBackend {
    async fn save_answers(&self, exam_id: ExamId, answers: &[Answer]) -> Result<(), BackendError> {
        let mut guard = self.state()?;
        ensure_reachable(&guard)?;
        guard.save_log.push(answers.to_vec());
        if let Some(error) = guard.save_failures.pop_front() {
            return Err(error);
        }
        let entry = open_exam(&mut guard, exam_id)?;
        if entry.submitted_at.is_some() {
            return Err(BackendError::rejected("exam already submitted"));
        }
        for answer in answers {
            entry.saved.insert(answer.question_id, answer.clone());
        }
        Ok(())
    }

    async fn submit_exam(&self, exam_id: ExamId) -> Result<SubmitReceipt, BackendError> {
        let now = self.clock.now();
        let mut guard = self.state()?;
        ensure_reachable(&guard)?;
        guard.submit_calls += 1;
        if let Some(error) = guard.submit_failures.pop_front() {
            return Err(error);
        }
        let entry = open_exam(&mut guard, exam_id)?;
        let submitted_at = *entry.submitted_at.get_or_insert(now);
        Ok(SubmitReceipt { submitted_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{AnswerValue, QuestionOption};
    use exam_core::time::{fixed_clock, fixed_now};

    fn exam() -> (ExamId, Vec<Question>) {
        let questions = vec![
            Question::subjective(QuestionId::new(2), 1, "Why?", 5).unwrap(),
            Question::multiple_choice(
                QuestionId::new(1),
                0,
                "Which?",
                1,
                vec![QuestionOption::new("a", "A"), QuestionOption::new("b", "B")],
            )
            .unwrap(),
        ];
        (ExamId::new(9), questions)
    }

    #[tokio::test]
    async fn questions_come_back_in_index_order() {
        let repo = InMemoryBackend::new();
        let (exam_id, questions) = exam();
        repo.insert_exam(exam_id, questions);

        let fetched = repo.fetch_questions(exam_id).await.unwrap();
        assert_eq!(fetched[0].id(), QuestionId::new(1));
        assert_eq!(fetched[1].id(), QuestionId::new(2));
    }

    #[tokio::test]
    async fn unreachable_backend_fails_transiently() {
        let repo = InMemoryBackend::new();
        let (exam_id, questions) = exam();
        repo.insert_exam(exam_id, questions);
        repo.set_reachable(false);

        let err = repo.save_answers(exam_id, &[]).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(repo.save_calls(), 0);
    }

    #[tokio::test]
    async fn closed_exam_rejects_submission() {
        let repo = InMemoryBackend::new();
        let (exam_id, questions) = exam();
        repo.insert_exam(exam_id, questions);
        repo.close_exam(exam_id, "exam closed");

        let err = repo.submit_exam(exam_id).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(repo.submit_calls(), 1);
    }

    #[tokio::test]
    async fn submission_is_idempotent() {
        let repo = InMemoryBackend::new().with_clock(fixed_clock());
        let (exam_id, questions) = exam();
        repo.insert_exam(exam_id, questions);

        let first = repo.submit_exam(exam_id).await.unwrap();
        let second = repo.submit_exam(exam_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.submitted_at(exam_id), Some(fixed_now()));
    }

    #[tokio::test]
    async fn saved_answers_become_the_draft() {
        let repo = InMemoryBackend::new();
        let (exam_id, questions) = exam();
        repo.insert_exam(exam_id, questions);

        let answer = Answer::new(QuestionId::new(1), &AnswerValue::option("b"));
        repo.save_answers(exam_id, std::slice::from_ref(&answer))
            .await
            .unwrap();

        assert_eq!(repo.fetch_draft(exam_id).await.unwrap(), vec![answer.clone()]);
        assert_eq!(repo.saved_answer(exam_id, QuestionId::new(1)), Some(answer));
    }
}
