use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use exam_backend::BackendError;
use exam_core::model::{
    Answer, ExamId, LockReason, Question, QuestionId, SessionState, ViolationTally,
};
use serde::Serialize;

use super::controller::{SessionController, Transition};
use super::violations::ViolationRecord;

/// Remaining time split for display; serialized as `{ mm, ss }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemainingTime {
    #[serde(rename = "mm")]
    pub minutes: u64,
    #[serde(rename = "ss")]
    pub seconds: u64,
}

impl RemainingTime {
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        let total = ms / 1_000;
        Self {
            minutes: total / 60,
            seconds: total % 60,
        }
    }
}

impl fmt::Display for RemainingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub remaining: RemainingTime,
    pub remaining_ms: u64,
    pub deadline: DateTime<Utc>,
    /// Remaining time is at or below the low-time warning.
    pub low_time: bool,
}

/// Palette state of a single question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionStatus {
    NotVisited,
    Unanswered,
    Answered,
    Marked,
    AnsweredMarked,
}

/// Read-only snapshot of a session, published after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub exam_id: ExamId,
    pub session_state: SessionState,
    pub lock_reason: Option<LockReason>,
    pub questions: Arc<[Question]>,
    pub answers: Vec<Answer>,
    pub marked_for_review: Vec<QuestionId>,
    pub current_index: usize,
    pub palette: Vec<QuestionStatus>,
    pub answered_count: usize,
    pub timer: TimerView,
    pub is_online: bool,
    pub saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub save_error: Option<String>,
    pub violations: ViolationTally,
    pub violation_log: Vec<ViolationRecord>,
    pub transitions: Vec<Transition>,
    pub submit_error: Option<String>,
    pub load_error: Option<String>,
    /// The failure behind `load_error`, kept for error classification.
    #[serde(skip)]
    pub load_failure: Option<BackendError>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SessionView {
    #[must_use]
    pub fn answer(&self, question_id: QuestionId) -> Option<&Answer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    #[must_use]
    pub fn is_marked(&self, question_id: QuestionId) -> bool {
        self.marked_for_review.contains(&question_id)
    }
}

impl SessionController {
    /// Snapshot the session as of `now`.
    #[must_use]
    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        let store = self.store();
        let sync = self.sync_status();
        let countdown = self.countdown();

        let remaining_ms = countdown.remaining_ms(now);
        let low_time_ms = u64::try_from(self.low_time_warning().as_millis()).unwrap_or(u64::MAX);

        let palette = store
            .questions()
            .iter()
            .enumerate()
            .map(|(index, q)| {
                let answered = store.is_answered(q.id());
                let marked = store.is_marked(q.id());
                match (answered, marked) {
                    (true, true) => QuestionStatus::AnsweredMarked,
                    (false, true) => QuestionStatus::Marked,
                    (true, false) => QuestionStatus::Answered,
                    (false, false) if self.was_visited(index) => QuestionStatus::Unanswered,
                    (false, false) => QuestionStatus::NotVisited,
                }
            })
            .collect();

        SessionView {
            exam_id: self.exam_id(),
            session_state: self.state(),
            lock_reason: self.lock_reason(),
            questions: Arc::clone(store.questions()),
            answers: store
                .answers()
                .iter()
                .map(|(id, value)| Answer::new(*id, value))
                .collect(),
            marked_for_review: store.marked().iter().copied().collect(),
            current_index: self.current_index(),
            palette,
            answered_count: store.answered_count(),
            timer: TimerView {
                remaining: RemainingTime::from_millis(remaining_ms),
                remaining_ms,
                deadline: countdown.deadline(),
                low_time: remaining_ms <= low_time_ms,
            },
            is_online: self.is_online(),
            saving: sync.saving,
            last_saved: sync.last_saved,
            pending_count: sync.pending_count,
            save_error: self.save_error().map(str::to_owned),
            violations: self.violations(),
            violation_log: self.violation_log().to_vec(),
            transitions: self.transitions().to_vec(),
            submit_error: self.submit_error().map(str::to_owned),
            load_error: self.load_error().map(BackendError::reason),
            load_failure: self.load_error().cloned(),
            submitted_at: self.receipt().map(|r| r.submitted_at),
        }
    }
}
