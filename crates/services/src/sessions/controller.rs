use std::time::Duration;

use chrono::{DateTime, Utc};
use exam_backend::{BackendError, SubmitReceipt};
use exam_core::model::{
    Answer, AnswerValue, ExamId, LockReason, Question, QuestionId, SessionState, ViolationKind,
    ViolationTally,
};
use exam_core::time::offset;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use super::answers::AnswerStore;
use super::clock::{Countdown, Tick};
use super::retry::Backoff;
use super::sync::{FlushOutcome, SaveBatch, SyncEngine, SyncPolicy, SyncStatus};
use super::violations::{ViolationMonitor, ViolationOutcome, ViolationRecord};

//
// ─── ACTIONS ───────────────────────────────────────────────────────────────────
//

/// Network work the runtime must perform on the controller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Save(SaveBatch),
    Submit { attempt: u32 },
}

/// One recorded state change, kept for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitPhase {
    Idle,
    /// Best-effort flush before submitting; gives up waiting at `grace_until`.
    Flushing { grace_until: DateTime<Utc> },
    Sending,
    Waiting { until: DateTime<Utc> },
    /// Terminal rejection; only a user-initiated submit restarts the flow.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(SubmitReceipt),
    Retrying { attempt: u32, at: DateTime<Utc> },
    Rejected { reason: String },
    /// A completion arrived while no submission was outstanding.
    Ignored,
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// Single owner of an exam session's state.
///
/// Every input (edits, navigation, clock ticks, environment signals, network
/// completions) arrives as a method call with the current time, and outgoing
/// network work is pulled with [`SessionController::poll_action`]. Nothing here
/// performs I/O, which keeps transitions serialized and testable.
#[derive(Debug, Clone)]
pub struct SessionController {
    exam_id: ExamId,
    state: SessionState,
    lock_reason: Option<LockReason>,
    countdown: Countdown,
    monitor: ViolationMonitor,
    store: AnswerStore,
    sync: SyncEngine,
    cursor: usize,
    visited: Vec<bool>,
    submit: SubmitPhase,
    submit_attempt: u32,
    submit_error: Option<String>,
    receipt: Option<SubmitReceipt>,
    load_error: Option<BackendError>,
    transitions: Vec<Transition>,
    flush_grace: Duration,
    low_time_warning: Duration,
    retry: Backoff,
}

impl SessionController {
    #[must_use]
    pub fn new(exam_id: ExamId, deadline: DateTime<Utc>, config: &SessionConfig) -> Self {
        Self {
            exam_id,
            state: SessionState::Loading,
            lock_reason: None,
            countdown: Countdown::start(deadline),
            monitor: ViolationMonitor::new(config.violation_policy()),
            store: AnswerStore::default(),
            sync: SyncEngine::new(SyncPolicy {
                debounce: config.save_debounce,
                max_batch_delay: config.max_batch_delay,
                retry: config.retry,
            }),
            cursor: 0,
            visited: Vec::new(),
            submit: SubmitPhase::Idle,
            submit_attempt: 0,
            submit_error: None,
            receipt: None,
            load_error: None,
            transitions: Vec::new(),
            flush_grace: config.submit_flush_grace,
            low_time_warning: config.low_time_warning,
            retry: config.retry,
        }
    }

    fn transition(&mut self, to: SessionState, now: DateTime<Utc>) {
        let from = self.state;
        if from == to {
            return;
        }
        info!(exam_id = %self.exam_id, %from, %to, "session transition");
        self.state = to;
        self.transitions.push(Transition { from, to, at: now });
    }

    /// Install the question set and any restored draft; `Loading → Active`.
    ///
    /// Returns how many draft answers were restored.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionLocked` if the session already loaded.
    pub fn load(
        &mut self,
        questions: Vec<Question>,
        draft: Vec<Answer>,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionError> {
        if self.state != SessionState::Loading {
            return Err(SessionError::SessionLocked { state: self.state });
        }
        self.visited = vec![false; questions.len()];
        self.store = AnswerStore::new(questions);
        let restored = self.store.restore(draft);
        self.load_error = None;
        self.transition(SessionState::Active, now);
        self.visit(0);
        // A deadline already in the past locks immediately.
        self.tick(now);
        Ok(restored)
    }

    pub fn fail_load(&mut self, err: BackendError) {
        warn!(exam_id = %self.exam_id, error = %err, "session failed to load");
        self.load_error = Some(err);
    }

    //
    // ─── TIME & SIGNALS ───────────────────────────────────────────────────────
    //

    /// Advance the countdown; expiry locks the session and starts submission.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Tick {
        if self.state != SessionState::Active {
            return Tick {
                remaining_ms: self.countdown.remaining_ms(now),
                expired: false,
            };
        }
        let tick = self.countdown.tick(now);
        if tick.expired {
            self.lock(LockReason::TimeExpired, now);
        }
        tick
    }

    pub fn record_violation(
        &mut self,
        kind: ViolationKind,
        now: DateTime<Utc>,
    ) -> ViolationOutcome {
        self.tick(now);
        if self.state != SessionState::Active {
            return ViolationOutcome::Ignored;
        }
        let outcome = self.monitor.record(kind, now);
        match outcome {
            ViolationOutcome::Counted { count } => {
                warn!(exam_id = %self.exam_id, kind = kind.as_str(), count, "violation recorded");
            }
            ViolationOutcome::ThresholdReached { count } => {
                warn!(
                    exam_id = %self.exam_id,
                    kind = kind.as_str(),
                    count,
                    "violation threshold reached"
                );
                self.lock(LockReason::IntegrityExceeded, now);
            }
            ViolationOutcome::Ignored => {}
        }
        outcome
    }

    pub fn set_online(&mut self, online: bool, now: DateTime<Utc>) {
        let restored = online && !self.sync.is_online();
        self.sync.set_online(online, now);
        if restored {
            if let SubmitPhase::Waiting { .. } = self.submit {
                self.submit = SubmitPhase::Waiting { until: now };
            }
        }
    }

    fn lock(&mut self, reason: LockReason, now: DateTime<Utc>) {
        if self.state != SessionState::Active {
            return;
        }
        info!(exam_id = %self.exam_id, ?reason, "session locked");
        self.lock_reason = Some(reason);
        self.transition(SessionState::Locked, now);
        self.begin_submit(now);
    }

    fn begin_submit(&mut self, now: DateTime<Utc>) {
        self.transition(SessionState::Submitting, now);
        self.submit_error = None;
        self.start_flush(now);
    }

    fn start_flush(&mut self, now: DateTime<Utc>) {
        self.submit = SubmitPhase::Flushing {
            grace_until: offset(now, self.flush_grace),
        };
        self.sync.expedite(now);
    }

    //
    // ─── STUDENT ACTIONS ──────────────────────────────────────────────────────
    //

    fn guard(
        &mut self,
        allowed: fn(SessionState) -> bool,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.tick(now);
        match self.state {
            state if allowed(state) => Ok(()),
            SessionState::Loading => Err(SessionError::NotReady),
            state => Err(SessionError::SessionLocked { state }),
        }
    }

    /// Store an answer and queue it for autosave.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Answer` for invalid values, `SessionLocked` once
    /// the session is locked or submitted, and `NotReady` while loading.
    pub fn set_answer(
        &mut self,
        question_id: QuestionId,
        value: AnswerValue,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.guard(SessionState::accepts_answers, now)?;
        let edit = self.store.set_answer(question_id, value)?;
        self.sync.record(&edit, now);
        Ok(())
    }

    /// # Errors
    ///
    /// Same conditions as [`SessionController::set_answer`].
    pub fn toggle_review(
        &mut self,
        question_id: QuestionId,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        self.guard(SessionState::accepts_answers, now)?;
        Ok(self.store.toggle_review(question_id)?)
    }

    /// Move to `index`, clamped to the question list.
    ///
    /// # Errors
    ///
    /// Returns `SessionLocked` once submission started, `NotReady` while loading.
    pub fn go_to(&mut self, index: usize, now: DateTime<Utc>) -> Result<usize, SessionError> {
        self.guard(SessionState::allows_navigation, now)?;
        let last = self.store.len().saturating_sub(1);
        self.cursor = index.min(last);
        self.visit(self.cursor);
        Ok(self.cursor)
    }

    /// # Errors
    ///
    /// See [`SessionController::go_to`].
    pub fn next(&mut self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        self.go_to(self.cursor.saturating_add(1), now)
    }

    /// Step back; a no-op at the first question.
    ///
    /// # Errors
    ///
    /// See [`SessionController::go_to`].
    pub fn prev(&mut self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        self.go_to(self.cursor.saturating_sub(1), now)
    }

    fn visit(&mut self, index: usize) {
        if let Some(seen) = self.visited.get_mut(index) {
            *seen = true;
        }
    }

    /// Ask for submission. Also the user-initiated retry after a rejection.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` while loading and `SessionLocked` once submitted.
    pub fn request_submit(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.tick(now);
        match self.state {
            SessionState::Loading => Err(SessionError::NotReady),
            state if state.is_terminal() => Err(SessionError::SessionLocked { state }),
            SessionState::Active | SessionState::Locked => {
                info!(exam_id = %self.exam_id, "submission requested");
                self.begin_submit(now);
                Ok(())
            }
            _ => {
                if self.submit == SubmitPhase::Rejected {
                    info!(exam_id = %self.exam_id, "retrying rejected submission");
                    self.submit_error = None;
                    self.sync.clear_halt(now);
                    self.start_flush(now);
                }
                Ok(())
            }
        }
    }

    /// Bypass the debounce window for everything queued.
    pub fn request_flush(&mut self, now: DateTime<Utc>) {
        self.sync.expedite(now);
    }

    /// Stop scheduling saves and retries; in-flight requests may still finish.
    pub fn close(&mut self) {
        self.sync.suspend();
        if let SubmitPhase::Waiting { .. } | SubmitPhase::Flushing { .. } = self.submit {
            self.submit = SubmitPhase::Idle;
        }
    }

    //
    // ─── NETWORK ──────────────────────────────────────────────────────────────
    //

    /// Next piece of network work due at `now`, if any.
    pub fn poll_action(&mut self, now: DateTime<Utc>) -> Option<Action> {
        if let Some(batch) = self.sync.poll(now) {
            return Some(Action::Save(batch));
        }

        if let SubmitPhase::Waiting { until } = self.submit {
            if now < until {
                return None;
            }
            self.start_flush(now);
            if let Some(batch) = self.sync.poll(now) {
                return Some(Action::Save(batch));
            }
        }

        let SubmitPhase::Flushing { grace_until } = self.submit else {
            return None;
        };
        if self.sync.is_saving() {
            return None;
        }
        let flushed = self.sync.is_idle() || self.sync.halt_reason().is_some();
        if !flushed && now < grace_until {
            return None;
        }
        if !flushed {
            warn!(
                exam_id = %self.exam_id,
                pending = self.sync.pending_count(),
                "submitting with unsaved answers"
            );
        }
        self.submit = SubmitPhase::Sending;
        self.submit_attempt = self.submit_attempt.saturating_add(1);
        Some(Action::Submit {
            attempt: self.submit_attempt,
        })
    }

    /// Earliest time at which [`SessionController::poll_action`] may have work.
    #[must_use]
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        let submit = match self.submit {
            SubmitPhase::Flushing { grace_until } if !self.sync.is_saving() => Some(grace_until),
            SubmitPhase::Waiting { until } => Some(until),
            _ => None,
        };
        match (self.sync.next_due(), submit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn save_completed(
        &mut self,
        batch_id: u64,
        result: Result<(), BackendError>,
        now: DateTime<Utc>,
    ) -> FlushOutcome {
        self.sync.complete(batch_id, result, now)
    }

    pub fn submit_completed(
        &mut self,
        result: Result<SubmitReceipt, BackendError>,
        now: DateTime<Utc>,
    ) -> SubmitOutcome {
        if self.submit != SubmitPhase::Sending {
            return SubmitOutcome::Ignored;
        }
        match result {
            Ok(receipt) => {
                info!(
                    exam_id = %self.exam_id,
                    submitted_at = %receipt.submitted_at,
                    "exam submitted"
                );
                self.submit = SubmitPhase::Idle;
                self.submit_error = None;
                self.receipt = Some(receipt.clone());
                self.sync.suspend();
                self.transition(SessionState::Submitted, now);
                SubmitOutcome::Submitted(receipt)
            }
            Err(err) if err.is_transient() => {
                let at = offset(now, self.retry.delay_for_attempt(self.submit_attempt));
                warn!(
                    exam_id = %self.exam_id,
                    attempt = self.submit_attempt,
                    error = %err,
                    "submit failed, will retry"
                );
                self.submit = SubmitPhase::Waiting { until: at };
                SubmitOutcome::Retrying {
                    attempt: self.submit_attempt,
                    at,
                }
            }
            Err(err) => {
                let reason = err.reason();
                warn!(exam_id = %self.exam_id, %reason, "submission rejected");
                self.submit = SubmitPhase::Rejected;
                self.submit_attempt = 0;
                self.submit_error = Some(reason.clone());
                SubmitOutcome::Rejected { reason }
            }
        }
    }

    //
    // ─── READ SIDE ────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn lock_reason(&self) -> Option<LockReason> {
        self.lock_reason
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn store(&self) -> &AnswerStore {
        &self.store
    }

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.sync.is_online()
    }

    #[must_use]
    pub fn sync_idle(&self) -> bool {
        self.sync.is_idle()
    }

    #[must_use]
    pub fn save_error(&self) -> Option<&str> {
        self.sync.halt_reason()
    }

    #[must_use]
    pub fn violations(&self) -> ViolationTally {
        self.monitor.tally()
    }

    #[must_use]
    pub fn violation_log(&self) -> &[ViolationRecord] {
        self.monitor.log()
    }

    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    #[must_use]
    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    #[must_use]
    pub fn low_time_warning(&self) -> Duration {
        self.low_time_warning
    }

    #[must_use]
    pub fn was_visited(&self, index: usize) -> bool {
        self.visited.get(index).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn submit_error(&self) -> Option<&str> {
        self.submit_error.as_deref()
    }

    #[must_use]
    pub fn load_error(&self) -> Option<&BackendError> {
        self.load_error.as_ref()
    }

    #[must_use]
    pub fn receipt(&self) -> Option<&SubmitReceipt> {
        self.receipt.as_ref()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Delta;
    use exam_core::model::{AnswerError, QuestionOption};
    use exam_core::time::fixed_now;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn questions() -> Vec<Question> {
        vec![
            Question::multiple_choice(
                QuestionId::new(1),
                0,
                "Which keyword moves ownership into a closure?",
                1,
                vec![
                    QuestionOption::new("a", "ref"),
                    QuestionOption::new("b", "move"),
                ],
            )
            .unwrap(),
            Question::subjective(QuestionId::new(2), 1, "What does Send mean?", 3).unwrap(),
            Question::subjective(QuestionId::new(3), 2, "What does Sync mean?", 3).unwrap(),
        ]
    }

    fn active(minutes: i64) -> SessionController {
        let now = fixed_now();
        let mut session = SessionController::new(
            ExamId::new(1),
            now + Delta::minutes(minutes),
            &SessionConfig::default(),
        );
        session.load(questions(), Vec::new(), now).unwrap();
        session
    }

    fn states(session: &SessionController) -> Vec<SessionState> {
        session.transitions().iter().map(|t| t.to).collect()
    }

    #[test]
    fn loading_rejects_edits() {
        let now = fixed_now();
        let mut session =
            SessionController::new(ExamId::new(1), now + Delta::minutes(10), &config());
        assert_eq!(
            session.set_answer(QuestionId::new(1), AnswerValue::option("b"), now),
            Err(SessionError::NotReady)
        );
        assert_eq!(session.next(now), Err(SessionError::NotReady));
    }

    #[test]
    fn load_restores_draft_and_activates() {
        let now = fixed_now();
        let mut session =
            SessionController::new(ExamId::new(1), now + Delta::minutes(10), &config());
        let restored = session
            .load(
                questions(),
                vec![Answer::new(QuestionId::new(2), &AnswerValue::text("thread-safe move"))],
                now,
            )
            .unwrap();

        assert_eq!(restored, 1);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.store().answered_count(), 1);
        // restored answers are already durable
        assert_eq!(session.sync_status().pending_count, 0);
        assert!(session.was_visited(0));
    }

    #[test]
    fn navigation_clamps_at_both_ends() {
        let now = fixed_now();
        let mut session = active(10);

        assert_eq!(session.prev(now), Ok(0));
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.go_to(99, now), Ok(2));
        assert_eq!(session.next(now), Ok(2));
        assert_eq!(session.prev(now), Ok(1));
        assert!(session.was_visited(2));
    }

    #[test]
    fn type_mismatch_never_reaches_sync() {
        let now = fixed_now();
        let mut session = active(10);
        let err = session
            .set_answer(QuestionId::new(1), AnswerValue::text("move"), now)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Answer(AnswerError::TypeMismatch { .. })
        ));
        assert_eq!(session.sync_status().pending_count, 0);
    }

    #[test]
    fn expiry_locks_then_submits_exactly_once() {
        let now = fixed_now();
        let mut session = active(1);
        session
            .set_answer(QuestionId::new(1), AnswerValue::option("b"), now)
            .unwrap();

        let end = now + Delta::minutes(1);
        assert!(session.tick(end).expired);
        assert!(!session.tick(end + Delta::seconds(1)).expired);
        assert_eq!(session.lock_reason(), Some(LockReason::TimeExpired));
        assert_eq!(
            states(&session),
            vec![
                SessionState::Active,
                SessionState::Locked,
                SessionState::Submitting
            ]
        );

        // forced submission flushes first
        let Some(Action::Save(batch)) = session.poll_action(end) else {
            panic!("expected a flush before submit");
        };
        assert_eq!(session.poll_action(end), None);
        session.save_completed(batch.id, Ok(()), end);
        assert_eq!(session.poll_action(end), Some(Action::Submit { attempt: 1 }));
        assert_eq!(session.poll_action(end), None);

        let receipt = SubmitReceipt { submitted_at: end };
        assert_eq!(
            session.submit_completed(Ok(receipt.clone()), end),
            SubmitOutcome::Submitted(receipt)
        );
        assert_eq!(session.state(), SessionState::Submitted);
    }

    #[test]
    fn remaining_time_never_increases_while_active() {
        let now = fixed_now();
        let mut session = active(1);
        // one-second ticks with a 20s gap, as after a suspended tab
        let offsets = (0..10).chain(30..=61).map(Delta::seconds);

        let mut last = u64::MAX;
        let mut expiries = 0;
        for by in offsets {
            let tick = session.tick(now + by);
            assert!(tick.remaining_ms <= last, "went up at {by}");
            last = tick.remaining_ms;
            expiries += usize::from(tick.expired);
        }
        assert_eq!(last, 0);
        assert_eq!(expiries, 1);
        assert_eq!(session.state(), SessionState::Submitting);
    }

    #[test]
    fn edits_after_expiry_are_rejected_even_before_a_tick() {
        let now = fixed_now();
        let mut session = active(1);
        let late = now + Delta::minutes(2);
        assert_eq!(
            session.set_answer(QuestionId::new(2), AnswerValue::text("late"), late),
            Err(SessionError::SessionLocked {
                state: SessionState::Submitting
            })
        );
        assert!(session.store().answers().is_empty());
    }

    #[test]
    fn five_violations_force_submission() {
        let now = fixed_now();
        let mut session = active(30);
        for i in 0..5 {
            session.record_violation(ViolationKind::FocusLoss, now + Delta::seconds(10 * i));
        }
        assert_eq!(session.violations().count, 5);
        assert_eq!(session.lock_reason(), Some(LockReason::IntegrityExceeded));
        assert_eq!(session.state(), SessionState::Submitting);

        let later = now + Delta::minutes(1);
        assert_eq!(
            session.record_violation(ViolationKind::FocusLoss, later),
            ViolationOutcome::Ignored
        );
        assert_eq!(session.violations().count, 5);

        // nothing to flush: straight to submit
        assert_eq!(session.poll_action(later), Some(Action::Submit { attempt: 1 }));
    }

    #[test]
    fn offline_flush_gives_up_after_grace() {
        let now = fixed_now();
        let mut session = active(30);
        session.set_online(false, now);
        session
            .set_answer(QuestionId::new(1), AnswerValue::option("a"), now)
            .unwrap();
        session.request_submit(now).unwrap();

        assert_eq!(session.poll_action(now), None);
        assert_eq!(session.next_wake(), Some(now + Delta::seconds(10)));
        assert_eq!(
            session.poll_action(now + Delta::seconds(10)),
            Some(Action::Submit { attempt: 1 })
        );
    }

    #[test]
    fn transient_submit_failure_retries_with_backoff() {
        let now = fixed_now();
        let mut session = active(30);
        session.request_submit(now).unwrap();
        assert_eq!(session.poll_action(now), Some(Action::Submit { attempt: 1 }));

        let outcome = session.submit_completed(Err(BackendError::Timeout), now);
        assert_eq!(
            outcome,
            SubmitOutcome::Retrying {
                attempt: 1,
                at: now + Delta::seconds(1)
            }
        );
        assert_eq!(session.state(), SessionState::Submitting);
        assert_eq!(session.submit_error(), None);
        assert_eq!(session.poll_action(now), None);
        assert_eq!(
            session.poll_action(now + Delta::seconds(1)),
            Some(Action::Submit { attempt: 2 })
        );
    }

    #[test]
    fn terminal_rejection_waits_for_user_retry() {
        let now = fixed_now();
        let mut session = active(30);
        session
            .set_answer(QuestionId::new(2), AnswerValue::text("kept"), now)
            .unwrap();
        session.request_flush(now);
        let Some(Action::Save(batch)) = session.poll_action(now) else {
            panic!("expected save");
        };
        session.save_completed(batch.id, Ok(()), now);

        session.request_submit(now).unwrap();
        assert_eq!(session.poll_action(now), Some(Action::Submit { attempt: 1 }));
        let outcome =
            session.submit_completed(Err(BackendError::rejected("exam already closed")), now);
        assert_eq!(
            outcome,
            SubmitOutcome::Rejected {
                reason: "exam already closed".into()
            }
        );
        assert_eq!(session.state(), SessionState::Submitting);
        assert_eq!(session.submit_error(), Some("exam already closed"));
        assert_eq!(session.poll_action(now + Delta::minutes(5)), None);
        assert_eq!(
            session.store().answer(QuestionId::new(2)),
            Some(&AnswerValue::text("kept"))
        );

        session.request_submit(now + Delta::minutes(5)).unwrap();
        assert_eq!(session.submit_error(), None);
        assert_eq!(
            session.poll_action(now + Delta::minutes(5)),
            Some(Action::Submit { attempt: 1 })
        );
    }

    #[test]
    fn submitted_session_rejects_everything() {
        let now = fixed_now();
        let mut session = active(30);
        session.request_submit(now).unwrap();
        session.poll_action(now);
        session.submit_completed(Ok(SubmitReceipt { submitted_at: now }), now);

        assert_eq!(
            session.set_answer(QuestionId::new(2), AnswerValue::text("x"), now),
            Err(SessionError::SessionLocked {
                state: SessionState::Submitted
            })
        );
        assert_eq!(
            session.toggle_review(QuestionId::new(2), now),
            Err(SessionError::SessionLocked {
                state: SessionState::Submitted
            })
        );
        assert_eq!(
            session.request_submit(now),
            Err(SessionError::SessionLocked {
                state: SessionState::Submitted
            })
        );
        assert!(session.store().answers().is_empty());
    }

    #[test]
    fn reconnect_cuts_submit_backoff_short() {
        let now = fixed_now();
        let mut session = active(30);
        session.request_submit(now).unwrap();
        session.poll_action(now);
        session.set_online(false, now);
        session.submit_completed(Err(BackendError::Unreachable("offline".into())), now);

        let soon = now + Delta::milliseconds(200);
        assert_eq!(session.poll_action(soon), None);
        session.set_online(true, soon);
        assert_eq!(session.poll_action(soon), Some(Action::Submit { attempt: 2 }));
    }
}
