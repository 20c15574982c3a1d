//! OpenAI Responses API frontdoor.

pub mod accumulator;
pub mod codec;
pub mod types;

pub use accumulator::ResponsesAccumulator;
pub use codec::{
    normalize_finish_reason, response_object, storage_status, ResponsesCodec, ThreadOptions,
};
pub use types::{OutputItem, ResponseObject, ResponsesRequest, ResponsesStreamEvent};
