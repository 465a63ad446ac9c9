#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sessions;

pub use exam_core::Clock;

pub use config::SessionConfig;
pub use error::{ConfigError, SessionError};

pub use sessions::{
    EnvironmentFeed, ExamSession, HostSignal, QuestionStatus, SessionHandle, SessionView,
    SyncStatus, ViolationOutcome,
};
