//! Plain data and pure functions shared by the engine and the CLI: request
//! construction, response classification, model configuration, run events.

pub mod events;
pub mod models;
pub mod payload;
pub mod request;
pub mod summary;

pub use payload::{classify, normalize, response_items, RawImagePayload};
pub use request::{GenerationRequest, GenerationRequestBuilder, ValidationError};
