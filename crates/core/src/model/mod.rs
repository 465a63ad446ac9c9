mod answer;
mod ids;
mod question;
mod session;
mod violation;

pub use ids::{ExamId, OptionId, ParseIdError, QuestionId};

pub use answer::{Answer, AnswerError, AnswerValue};
pub use question::{Question, QuestionError, QuestionKind, QuestionOption};
pub use session::{LockReason, SessionState};
pub use violation::{VIOLATION_THRESHOLD, ViolationKind, ViolationTally};
