use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use exam_backend::BackendError;
use exam_core::model::{Answer, AnswerValue, QuestionId};
use exam_core::time::offset;
use serde::Serialize;
use tracing::{debug, warn};

use super::answers::AnswerEdit;
use super::retry::Backoff;

/// Timing rules for autosave.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPolicy {
    /// Quiet period after the last edit before a flush.
    pub debounce: Duration,
    /// Upper bound on how long an edit may wait while edits keep coming.
    pub max_batch_delay: Duration,
    pub retry: Backoff,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1_500),
            max_batch_delay: Duration::from_secs(5),
            retry: Backoff::default(),
        }
    }
}

/// Autosave indicators for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub pending_count: usize,
}

/// One request's worth of answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveBatch {
    pub id: u64,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// `superseded` counts keys edited again while the request was in flight.
    Saved { saved: usize, superseded: usize },
    Retrying { attempt: u32, at: DateTime<Utc> },
    Halted { reason: String },
    /// Acknowledgment for a batch this engine is not waiting on.
    Unknown,
}

#[derive(Debug, Clone)]
struct InFlight {
    id: u64,
    entries: BTreeMap<QuestionId, AnswerValue>,
}

/// Collapses answer edits into debounced save batches and tracks their fate.
///
/// Only one batch is in flight at a time, so two saves for the same question
/// can never race and the backend sees each question's values in local order.
/// A failed batch goes back to the queue unless a newer edit replaced it.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    policy: SyncPolicy,
    pending: BTreeMap<QuestionId, AnswerValue>,
    in_flight: Option<InFlight>,
    next_batch: u64,
    online: bool,
    last_edit_at: Option<DateTime<Utc>>,
    first_pending_at: Option<DateTime<Utc>>,
    expedite_at: Option<DateTime<Utc>>,
    retry_at: Option<DateTime<Utc>>,
    attempt: u32,
    last_saved: Option<DateTime<Utc>>,
    halted: Option<String>,
    suspended: bool,
}

impl SyncEngine {
    #[must_use]
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            policy,
            pending: BTreeMap::new(),
            in_flight: None,
            next_batch: 0,
            online: true,
            last_edit_at: None,
            first_pending_at: None,
            expedite_at: None,
            retry_at: None,
            attempt: 0,
            last_saved: None,
            halted: None,
            suspended: false,
        }
    }

    /// Queue an edit, replacing any queued value for the same question.
    pub fn record(&mut self, edit: &AnswerEdit, now: DateTime<Utc>) {
        self.pending.insert(edit.question_id, edit.value.clone());
        self.last_edit_at = Some(now);
        self.first_pending_at.get_or_insert(now);
    }

    /// Track connectivity. Coming back online schedules an immediate retry.
    pub fn set_online(&mut self, online: bool, now: DateTime<Utc>) {
        let restored = online && !self.online;
        self.online = online;
        if restored && !self.pending.is_empty() {
            debug!(pending = self.pending.len(), "connection restored, flushing");
            self.attempt = 0;
            self.retry_at = None;
            self.expedite_at = Some(now);
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Skip the debounce window and any backoff wait.
    pub fn expedite(&mut self, now: DateTime<Utc>) {
        if !self.pending.is_empty() {
            self.expedite_at = Some(now);
        }
    }

    /// Clear a terminal failure so queued answers may be tried again.
    pub fn clear_halt(&mut self, now: DateTime<Utc>) {
        if self.halted.take().is_some() {
            self.attempt = 0;
            self.retry_at = None;
            self.expedite(now);
        }
    }

    /// Stop scheduling flushes; an in-flight request still completes.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// When the next flush is due, if one is waiting.
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        if self.suspended
            || self.halted.is_some()
            || self.in_flight.is_some()
            || !self.online
            || self.pending.is_empty()
        {
            return None;
        }
        if let Some(at) = self.expedite_at {
            return Some(at);
        }
        if let Some(at) = self.retry_at {
            return Some(at);
        }
        let quiet = self.last_edit_at.map(|t| offset(t, self.policy.debounce));
        let capped = self
            .first_pending_at
            .map(|t| offset(t, self.policy.max_batch_delay));
        match (quiet, capped) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Take the next batch if it is due at `now`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<SaveBatch> {
        match self.next_due() {
            Some(due) if due <= now => Some(self.take_batch()),
            _ => None,
        }
    }

    fn take_batch(&mut self) -> SaveBatch {
        self.next_batch += 1;
        let entries = std::mem::take(&mut self.pending);
        let answers = entries
            .iter()
            .map(|(id, value)| Answer::new(*id, value))
            .collect();
        self.in_flight = Some(InFlight {
            id: self.next_batch,
            entries,
        });
        self.first_pending_at = None;
        self.expedite_at = None;
        self.retry_at = None;
        SaveBatch {
            id: self.next_batch,
            answers,
        }
    }

    /// Apply the result of a save request.
    pub fn complete(
        &mut self,
        batch_id: u64,
        result: Result<(), BackendError>,
        now: DateTime<Utc>,
    ) -> FlushOutcome {
        let Some(flight) = self.in_flight.take_if(|f| f.id == batch_id) else {
            return FlushOutcome::Unknown;
        };

        match result {
            Ok(()) => {
                let superseded = flight
                    .entries
                    .keys()
                    .filter(|id| self.pending.contains_key(id))
                    .count();
                self.last_saved = Some(now);
                self.attempt = 0;
                FlushOutcome::Saved {
                    saved: flight.entries.len(),
                    superseded,
                }
            }
            Err(err) => {
                self.requeue(flight, now);
                if err.is_transient() {
                    self.attempt = self.attempt.saturating_add(1);
                    let at = offset(now, self.policy.retry.delay_for_attempt(self.attempt));
                    self.retry_at = Some(at);
                    warn!(attempt = self.attempt, error = %err, "save failed, will retry");
                    FlushOutcome::Retrying {
                        attempt: self.attempt,
                        at,
                    }
                } else {
                    let reason = err.reason();
                    warn!(%reason, "save rejected by server");
                    self.halted = Some(reason.clone());
                    FlushOutcome::Halted { reason }
                }
            }
        }
    }

    fn requeue(&mut self, flight: InFlight, now: DateTime<Utc>) {
        for (id, value) in flight.entries {
            // A newer local edit wins over the value that failed to save.
            self.pending.entry(id).or_insert(value);
        }
        if !self.pending.is_empty() {
            self.first_pending_at.get_or_insert(now);
        }
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            saving: self.in_flight.is_some(),
            last_saved: self.last_saved,
            pending_count: self.pending_count(),
        }
    }

    /// Distinct questions not yet acknowledged, queued or in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let in_flight_only = self.in_flight.as_ref().map_or(0, |f| {
            f.entries
                .keys()
                .filter(|id| !self.pending.contains_key(id))
                .count()
        });
        self.pending.len() + in_flight_only
    }

    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Nothing queued and nothing in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    #[must_use]
    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    #[must_use]
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.last_saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Delta;
    use exam_core::time::fixed_now;

    fn edit(id: u64, value: AnswerValue) -> AnswerEdit {
        AnswerEdit {
            question_id: QuestionId::new(id),
            value,
        }
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(SyncPolicy::default())
    }

    #[test]
    fn last_write_wins_within_a_batch() {
        let mut sync = engine();
        let now = fixed_now();
        for (i, text) in ["R", "Ru", "Rus", "Rust"].into_iter().enumerate() {
            let at = now + Delta::milliseconds(i64::try_from(i).unwrap() * 100);
            sync.record(&edit(2, AnswerValue::text(text)), at);
        }

        assert!(sync.poll(now + Delta::milliseconds(1_000)).is_none());
        let batch = sync.poll(now + Delta::milliseconds(1_800)).unwrap();
        assert_eq!(batch.answers.len(), 1);
        assert_eq!(batch.answers[0].response_text.as_deref(), Some("Rust"));
    }

    #[test]
    fn steady_typing_is_capped_by_max_batch_delay() {
        let mut sync = engine();
        let now = fixed_now();
        for i in 0..60 {
            sync.record(
                &edit(2, AnswerValue::text(format!("{i}"))),
                now + Delta::milliseconds(i * 100),
            );
        }
        assert_eq!(sync.next_due(), Some(now + Delta::seconds(5)));
    }

    #[test]
    fn offline_keeps_answers_pending_until_reconnect() {
        let mut sync = engine();
        let now = fixed_now();
        sync.set_online(false, now);
        sync.record(&edit(1, AnswerValue::option("b")), now);

        assert!(sync.poll(now + Delta::seconds(3)).is_none());
        assert_eq!(
            sync.status(),
            SyncStatus {
                saving: false,
                last_saved: None,
                pending_count: 1,
            }
        );

        let back = now + Delta::seconds(4);
        sync.set_online(true, back);
        let batch = sync.poll(back).unwrap();
        assert!(sync.status().saving);

        let outcome = sync.complete(batch.id, Ok(()), back);
        assert_eq!(
            outcome,
            FlushOutcome::Saved {
                saved: 1,
                superseded: 0
            }
        );
        assert_eq!(sync.status().pending_count, 0);
        assert_eq!(sync.last_saved(), Some(back));
    }

    #[test]
    fn edit_during_flight_is_not_overwritten_by_ack() {
        let mut sync = engine();
        let now = fixed_now();
        sync.record(&edit(2, AnswerValue::text("old")), now);
        sync.expedite(now);
        let batch = sync.poll(now).unwrap();

        sync.record(&edit(2, AnswerValue::text("new")), now);
        assert_eq!(sync.pending_count(), 1);
        // no second concurrent request while one is in flight
        assert!(sync.poll(now + Delta::seconds(10)).is_none());

        let outcome = sync.complete(batch.id, Ok(()), now);
        assert_eq!(
            outcome,
            FlushOutcome::Saved {
                saved: 1,
                superseded: 1
            }
        );
        assert_eq!(sync.pending_count(), 1);

        let next = sync.poll(now + Delta::seconds(2)).unwrap();
        assert_eq!(next.answers[0].response_text.as_deref(), Some("new"));
    }

    #[test]
    fn failed_batch_is_requeued_behind_newer_edits() {
        let mut sync = engine();
        let now = fixed_now();
        sync.record(&edit(1, AnswerValue::option("a")), now);
        sync.record(&edit(2, AnswerValue::text("first")), now);
        sync.expedite(now);
        let batch = sync.poll(now).unwrap();

        sync.record(&edit(2, AnswerValue::text("second")), now);
        let outcome = sync.complete(batch.id, Err(BackendError::Timeout), now);
        assert_eq!(
            outcome,
            FlushOutcome::Retrying {
                attempt: 1,
                at: now + Delta::seconds(1),
            }
        );

        let retry = sync.poll(now + Delta::seconds(2)).unwrap();
        let texts: Vec<_> = retry
            .answers
            .iter()
            .map(|a| (a.question_id.value(), a.response_text.clone()))
            .collect();
        assert_eq!(
            texts,
            vec![(1, None), (2, Some("second".to_string()))]
        );
    }

    #[test]
    fn backoff_grows_between_failures() {
        let mut sync = engine();
        let now = fixed_now();
        sync.record(&edit(1, AnswerValue::option("a")), now);
        sync.expedite(now);

        let mut at = now;
        for expected in [1, 2, 4, 8] {
            let batch = sync.poll(at).unwrap();
            match sync.complete(batch.id, Err(BackendError::Unavailable { status: 503 }), at) {
                FlushOutcome::Retrying { at: next, .. } => {
                    assert_eq!(next - at, Delta::seconds(expected));
                    at = next;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn terminal_rejection_halts_without_dropping_answers() {
        let mut sync = engine();
        let now = fixed_now();
        sync.record(&edit(1, AnswerValue::option("a")), now);
        sync.expedite(now);
        let batch = sync.poll(now).unwrap();

        let outcome = sync.complete(batch.id, Err(BackendError::rejected("exam closed")), now);
        assert_eq!(
            outcome,
            FlushOutcome::Halted {
                reason: "exam closed".into()
            }
        );
        assert_eq!(sync.halt_reason(), Some("exam closed"));
        assert_eq!(sync.pending_count(), 1);
        assert!(sync.next_due().is_none());

        sync.clear_halt(now);
        assert_eq!(sync.next_due(), Some(now));
    }

    #[test]
    fn stale_batch_id_is_ignored() {
        let mut sync = engine();
        assert_eq!(sync.complete(42, Ok(()), fixed_now()), FlushOutcome::Unknown);
    }

    #[test]
    fn suspended_engine_schedules_nothing() {
        let mut sync = engine();
        let now = fixed_now();
        sync.record(&edit(1, AnswerValue::option("a")), now);
        sync.suspend();
        assert!(sync.next_due().is_none());
        assert!(!sync.is_idle());
    }
}
