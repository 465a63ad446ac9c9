#![forbid(unsafe_code)]

pub mod http;
pub mod memory;
pub mod repository;

pub use http::{HttpBackend, HttpBackendConfig};
pub use memory::InMemoryBackend;
pub use repository::{
    AnswerPersistence, Backend, BackendError, QuestionRecord, QuestionSource, SubmitReceipt,
};
