//! Request module - Records, queued tasks and the status lifecycle

pub mod model;
pub mod status;
pub mod transition;

pub use model::{GenerationParameters, GenerationTask, InferenceRequest, RequestRecord, StatusView};
pub use status::RequestStatus;
pub use transition::{next_status, RequestEvent};
