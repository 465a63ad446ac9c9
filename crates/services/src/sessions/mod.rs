mod answers;
mod clock;
mod controller;
mod retry;
mod runtime;
mod signals;
mod sync;
mod view;
mod violations;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use answers::{AnswerEdit, AnswerStore};
pub use clock::{Countdown, SessionClock, Tick};
pub use controller::{Action, SessionController, SubmitOutcome, Transition};
pub use retry::Backoff;
pub use runtime::{ExamSession, SessionHandle};
pub use signals::{EnvironmentFeed, HostSignal};
pub use sync::{FlushOutcome, SaveBatch, SyncEngine, SyncPolicy, SyncStatus};
pub use view::{QuestionStatus, RemainingTime, SessionView, TimerView};
pub use violations::{ViolationMonitor, ViolationOutcome, ViolationPolicy, ViolationRecord};
