use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use exam_backend::{Backend, BackendError, SubmitReceipt};
use exam_core::Clock;
use exam_core::model::{
    Answer, AnswerValue, ExamId, Question, QuestionId, SessionState, ViolationKind,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use super::clock::SessionClock;
use super::controller::{Action, SessionController};
use super::signals::{EnvironmentFeed, HostSignal};
use super::sync::{FlushOutcome, SyncStatus};
use super::violations::ViolationOutcome;
use super::view::SessionView;

const COMMAND_BUFFER: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

#[derive(Debug, Clone, Copy)]
enum Move {
    To(usize),
    Next,
    Prev,
}

#[derive(Debug)]
enum Command {
    SetAnswer {
        question_id: QuestionId,
        value: AnswerValue,
        reply: Reply<()>,
    },
    ToggleReview {
        question_id: QuestionId,
        reply: Reply<bool>,
    },
    Navigate {
        to: Move,
        reply: Reply<usize>,
    },
    Submit {
        reply: Reply<()>,
    },
    Flush {
        reply: Reply<SyncStatus>,
    },
    SetOnline {
        online: bool,
        reply: Reply<()>,
    },
    Violation {
        kind: ViolationKind,
        reply: Reply<ViolationOutcome>,
    },
    Close {
        reply: Reply<()>,
    },
}

#[derive(Debug)]
enum Completion {
    Loaded(Result<(Vec<Question>, Vec<Answer>), BackendError>),
    Saved {
        batch_id: u64,
        result: Result<(), BackendError>,
    },
    Submitted(Result<SubmitReceipt, BackendError>),
}

//
// ─── STARTUP ───────────────────────────────────────────────────────────────────
//

/// Everything needed to run one student's exam session.
#[derive(Clone)]
pub struct ExamSession {
    exam_id: ExamId,
    deadline: DateTime<Utc>,
    backend: Backend,
    config: SessionConfig,
    clock: Clock,
}

impl ExamSession {
    #[must_use]
    pub fn new(exam_id: ExamId, deadline: DateTime<Utc>, backend: Backend) -> Self {
        Self {
            exam_id,
            deadline,
            backend,
            config: SessionConfig::default(),
            clock: Clock::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the session task and begin loading questions.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if the configuration is invalid.
    pub fn start(self, feed: &EnvironmentFeed) -> Result<SessionHandle, SessionError> {
        self.config.validate()?;

        let clock = SessionClock::start(self.clock);
        let controller = SessionController::new(self.exam_id, self.deadline, &self.config);
        let (view_tx, view_rx) = watch::channel(controller.view(clock.now()));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        info!(exam_id = %self.exam_id, deadline = %self.deadline, "starting exam session");

        let actor = SessionActor {
            controller,
            clock,
            backend: self.backend,
            config: self.config,
            views: view_tx,
            commands: command_rx,
            completions: completion_rx,
            completion_tx,
            signals: Some(feed.subscribe()),
            flush_waiters: Vec::new(),
            in_flight: 0,
        };
        actor.spawn_load();
        tokio::spawn(actor.run());

        Ok(SessionHandle {
            commands: command_tx,
            views: view_rx,
        })
    }
}

//
// ─── HANDLE ────────────────────────────────────────────────────────────────────
//

/// Cloneable front door to a running session.
///
/// Every call is forwarded to the session task, which applies it in arrival
/// order. Calls made after the session closed return `SessionError::Closed`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    views: watch::Receiver<SessionView>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// # Errors
    ///
    /// `Answer` for invalid values, `SessionLocked` once locked, `NotReady`
    /// while loading.
    pub async fn set_answer(
        &self,
        question_id: QuestionId,
        value: AnswerValue,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::SetAnswer {
            question_id,
            value,
            reply,
        })
        .await
    }

    /// Flip the review mark; returns whether the question is now marked.
    ///
    /// # Errors
    ///
    /// Same as [`SessionHandle::set_answer`].
    pub async fn toggle_review(&self, question_id: QuestionId) -> Result<bool, SessionError> {
        self.request(|reply| Command::ToggleReview { question_id, reply })
            .await
    }

    /// # Errors
    ///
    /// `SessionLocked` once submission started, `NotReady` while loading.
    pub async fn go_to(&self, index: usize) -> Result<usize, SessionError> {
        self.navigate(Move::To(index)).await
    }

    /// # Errors
    ///
    /// See [`SessionHandle::go_to`].
    pub async fn next(&self) -> Result<usize, SessionError> {
        self.navigate(Move::Next).await
    }

    /// # Errors
    ///
    /// See [`SessionHandle::go_to`].
    pub async fn prev(&self) -> Result<usize, SessionError> {
        self.navigate(Move::Prev).await
    }

    async fn navigate(&self, to: Move) -> Result<usize, SessionError> {
        self.request(|reply| Command::Navigate { to, reply }).await
    }

    /// Start submission. Resolves once the request is accepted; use
    /// [`SessionHandle::wait_for_submitted`] to wait for the outcome.
    ///
    /// # Errors
    ///
    /// `NotReady` while loading, `SessionLocked` once submitted.
    pub async fn submit(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Submit { reply }).await
    }

    /// Save everything queued now and wait until nothing is left unsaved.
    ///
    /// Transient failures and offline periods keep the caller waiting while
    /// saves are retried; wrap the call in `tokio::time::timeout` to cap it.
    ///
    /// # Errors
    ///
    /// `TerminalServer` when the server rejected a save, `SessionLocked` if the
    /// exam was submitted with answers still unsaved, `Closed` if the session
    /// closed first.
    pub async fn flush_now(&self) -> Result<SyncStatus, SessionError> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// # Errors
    ///
    /// `Closed` if the session already ended.
    pub async fn set_online(&self, online: bool) -> Result<(), SessionError> {
        self.request(|reply| Command::SetOnline { online, reply })
            .await
    }

    /// # Errors
    ///
    /// `Closed` if the session already ended.
    pub async fn report_violation(
        &self,
        kind: ViolationKind,
    ) -> Result<ViolationOutcome, SessionError> {
        self.request(|reply| Command::Violation { kind, reply })
            .await
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.views.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.views.clone()
    }

    /// Wait until a published snapshot satisfies `done`.
    ///
    /// # Errors
    ///
    /// `Closed` if the session ended before the condition held.
    pub async fn wait_until(
        &self,
        mut done: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView, SessionError> {
        let mut views = self.views.clone();
        loop {
            {
                let view = views.borrow_and_update();
                if done(&*view) {
                    return Ok(view.clone());
                }
            }
            if views.changed().await.is_err() {
                let view = views.borrow();
                if done(&*view) {
                    return Ok(view.clone());
                }
                return Err(SessionError::Closed);
            }
        }
    }

    /// Wait for loading to finish.
    ///
    /// # Errors
    ///
    /// `TerminalServer` if the server refused the exam, `TransientNetwork` if
    /// it stayed unreachable through every load attempt.
    pub async fn ready(&self) -> Result<SessionView, SessionError> {
        let view = self
            .wait_until(|v| v.session_state != SessionState::Loading || v.load_failure.is_some())
            .await?;
        match &view.load_failure {
            Some(err) if view.session_state == SessionState::Loading => {
                Err(SessionError::from(err.clone()))
            }
            _ => Ok(view),
        }
    }

    /// # Errors
    ///
    /// `Closed` if the session ended first.
    pub async fn wait_for_state(&self, state: SessionState) -> Result<SessionView, SessionError> {
        self.wait_until(|v| v.session_state == state).await
    }

    /// # Errors
    ///
    /// `Closed` if the session ended before submission succeeded.
    pub async fn wait_for_submitted(&self) -> Result<SessionView, SessionError> {
        self.wait_for_state(SessionState::Submitted).await
    }

    /// Stop the session: timers and retries are cancelled, signals are
    /// unsubscribed, and an in-flight request is allowed to finish.
    ///
    /// # Errors
    ///
    /// Never fails in practice; closing an already-closed session is `Ok`.
    pub async fn close(&self) -> Result<(), SessionError> {
        match self.request(|reply| Command::Close { reply }).await {
            Err(SessionError::Closed) => Ok(()),
            other => other,
        }
    }
}

//
// ─── ACTOR ─────────────────────────────────────────────────────────────────────
//

struct SessionActor {
    controller: SessionController,
    clock: SessionClock,
    backend: Backend,
    config: SessionConfig,
    views: watch::Sender<SessionView>,
    commands: mpsc::Receiver<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    signals: Option<broadcast::Receiver<HostSignal>>,
    flush_waiters: Vec<Reply<SyncStatus>>,
    in_flight: usize,
}

impl SessionActor {
    async fn run(mut self) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let wake = self
                .controller
                .next_wake()
                .map(|at| self.clock.instant_at(at));

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Close { reply }) => {
                            self.shutdown().await;
                            let _ = reply.send(Ok(()));
                            return;
                        }
                        Some(command) => self.handle(command),
                        None => {
                            debug!(exam_id = %self.controller.exam_id(), "all handles dropped");
                            self.shutdown().await;
                            return;
                        }
                    }
                }
                Some(done) = self.completions.recv() => self.complete(done),
                signal = next_signal(&mut self.signals) => match signal {
                    Some(signal) => self.on_signal(signal),
                    None => self.signals = None,
                },
                _ = ticker.tick() => {
                    self.controller.tick(self.clock.now());
                }
                () = sleep_until_opt(wake) => {}
            }

            self.drive();
        }
    }

    fn handle(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::SetAnswer {
                question_id,
                value,
                reply,
            } => {
                let _ = reply.send(self.controller.set_answer(question_id, value, now));
            }
            Command::ToggleReview { question_id, reply } => {
                let _ = reply.send(self.controller.toggle_review(question_id, now));
            }
            Command::Navigate { to, reply } => {
                let result = match to {
                    Move::To(index) => self.controller.go_to(index, now),
                    Move::Next => self.controller.next(now),
                    Move::Prev => self.controller.prev(now),
                };
                let _ = reply.send(result);
            }
            Command::Submit { reply } => {
                let _ = reply.send(self.controller.request_submit(now));
            }
            Command::Flush { reply } => self.flush(reply, now),
            Command::SetOnline { online, reply } => {
                self.set_online(online, now);
                let _ = reply.send(Ok(()));
            }
            Command::Violation { kind, reply } => {
                let _ = reply.send(Ok(self.controller.record_violation(kind, now)));
            }
            // handled by the loop
            Command::Close { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn flush(&mut self, reply: Reply<SyncStatus>, now: DateTime<Utc>) {
        self.controller.request_flush(now);
        self.flush_waiters.push(reply);
        self.settle_flush_waiters();
    }

    fn set_online(&mut self, online: bool, now: DateTime<Utc>) {
        if online != self.controller.is_online() {
            info!(exam_id = %self.controller.exam_id(), online, "connectivity changed");
        }
        self.controller.set_online(online, now);
    }

    fn on_signal(&mut self, signal: HostSignal) {
        let now = self.clock.now();
        match signal {
            HostSignal::Connectivity { online } => self.set_online(online, now),
            HostSignal::Violation(kind) => {
                self.controller.record_violation(kind, now);
            }
        }
    }

    fn complete(&mut self, done: Completion) {
        let now = self.clock.now();
        match done {
            Completion::Loaded(Ok((questions, draft))) => {
                let count = questions.len();
                match self.controller.load(questions, draft, now) {
                    Ok(restored) => {
                        info!(
                            exam_id = %self.controller.exam_id(),
                            questions = count,
                            restored,
                            "exam loaded"
                        );
                    }
                    Err(err) => warn!(error = %err, "ignoring late load"),
                }
            }
            Completion::Loaded(Err(err)) => self.controller.fail_load(err),
            Completion::Saved { batch_id, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                let outcome = self.controller.save_completed(batch_id, result, now);
                debug!(batch_id, ?outcome, "save completed");
                let saved = matches!(outcome, FlushOutcome::Saved { .. });
                if saved && !self.flush_waiters.is_empty() {
                    // edits made mid-request skip the debounce too
                    self.controller.request_flush(now);
                }
            }
            Completion::Submitted(result) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                let outcome = self.controller.submit_completed(result, now);
                debug!(?outcome, "submit completed");
            }
        }
    }

    /// Answer `flush_now` callers once the queue drained or can no longer
    /// drain. Retries and offline periods leave them waiting.
    fn settle_flush_waiters(&mut self) {
        if self.flush_waiters.is_empty() {
            return;
        }
        let result = if self.controller.sync_idle() {
            Ok(self.controller.sync_status())
        } else if let Some(reason) = self.controller.save_error() {
            Err(SessionError::TerminalServer {
                reason: reason.to_owned(),
            })
        } else if self.controller.state().is_terminal() {
            Err(SessionError::SessionLocked {
                state: self.controller.state(),
            })
        } else {
            return;
        };
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    /// Start whatever network work is due, then publish a fresh snapshot.
    fn drive(&mut self) {
        let now = self.clock.now();
        let exam_id = self.controller.exam_id();
        while let Some(action) = self.controller.poll_action(now) {
            match action {
                Action::Save(batch) => {
                    debug!(batch_id = batch.id, answers = batch.answers.len(), "saving answers");
                    let answers = Arc::clone(&self.backend.answers);
                    let batch_id = batch.id;
                    self.spawn_request(
                        async move {
                            let result = answers.save_answers(exam_id, &batch.answers).await;
                            Completion::Saved { batch_id, result }
                        },
                        Completion::Saved {
                            batch_id,
                            result: Err(BackendError::Timeout),
                        },
                    );
                }
                Action::Submit { attempt } => {
                    info!(%exam_id, attempt, "submitting exam");
                    let answers = Arc::clone(&self.backend.answers);
                    self.spawn_request(
                        async move { Completion::Submitted(answers.submit_exam(exam_id).await) },
                        Completion::Submitted(Err(BackendError::Timeout)),
                    );
                }
            }
        }

        if self.controller.state().is_terminal() && self.signals.take().is_some() {
            debug!(exam_id = %self.controller.exam_id(), "unsubscribed from host signals");
        }
        self.settle_flush_waiters();
        self.publish();
    }

    /// Run a backend call under the request timeout and report it back.
    fn spawn_request<F>(&mut self, call: F, on_timeout: Completion)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.completion_tx.clone();
        let limit = self.config.request_timeout;
        tokio::spawn(async move {
            let completion = timeout(limit, call).await.unwrap_or(on_timeout);
            let _ = tx.send(completion);
        });
    }

    fn publish(&self) {
        let view = self.controller.view(self.clock.now());
        self.views.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    fn spawn_load(&self) {
        let backend = self.backend.clone();
        let exam_id = self.controller.exam_id();
        let attempts = self.config.load_attempts;
        let retry = self.config.retry;
        let limit = self.config.request_timeout;
        let tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let mut attempt = 0;
            let result = loop {
                attempt += 1;
                let fetched = timeout(limit, backend.questions.fetch_questions(exam_id))
                    .await
                    .unwrap_or(Err(BackendError::Timeout));
                match fetched {
                    Ok(questions) => break Ok(questions),
                    Err(err) if err.is_transient() && attempt < attempts => {
                        let delay = retry.delay_for_attempt(attempt);
                        warn!(
                            %exam_id,
                            attempt,
                            error = %err,
                            ?delay,
                            "loading questions failed, retrying"
                        );
                        sleep(delay).await;
                    }
                    Err(err) => break Err(err),
                }
            };

            let loaded = match result {
                Ok(questions) => {
                    let draft = match timeout(limit, backend.questions.fetch_draft(exam_id)).await {
                        Ok(Ok(draft)) => draft,
                        Ok(Err(err)) => {
                            warn!(%exam_id, error = %err, "draft unavailable, starting empty");
                            Vec::new()
                        }
                        Err(_) => {
                            warn!(%exam_id, "draft request timed out, starting empty");
                            Vec::new()
                        }
                    };
                    Ok((questions, draft))
                }
                Err(err) => {
                    warn!(%exam_id, error = %err, "could not load questions");
                    Err(err)
                }
            };
            let _ = tx.send(Completion::Loaded(loaded));
        });
    }

    /// Cancel scheduled work, drop the signal subscription, and let any
    /// request already on the wire complete.
    async fn shutdown(&mut self) {
        info!(
            exam_id = %self.controller.exam_id(),
            state = %self.controller.state(),
            "closing exam session"
        );
        self.controller.close();
        self.signals = None;
        while self.in_flight > 0 {
            match self.completions.recv().await {
                Some(done @ (Completion::Saved { .. } | Completion::Submitted(_))) => {
                    self.complete(done);
                }
                Some(Completion::Loaded(_)) => {}
                None => break,
            }
        }
        self.settle_flush_waiters();
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Closed));
        }
        self.publish();
    }
}

async fn next_signal(signals: &mut Option<broadcast::Receiver<HostSignal>>) -> Option<HostSignal> {
    let Some(rx) = signals.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(signal) => return Some(signal),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "host signal feed lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
