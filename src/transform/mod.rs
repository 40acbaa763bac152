//! Request/response rewriting between the public Generative Language API
//! shape and the internal Code Assist shape.
//!
//! The request direction is strict (a malformed model path simply passes
//! through untransformed); the response direction is forgiving — any
//! failure to unwrap an envelope leaves the original bytes untouched, so
//! the transform layer can never turn a good backend response into an
//! error.

pub mod request;
pub mod response;
pub mod sse;

pub use request::{transform_request, TransformContext, TransformedRequest};
pub use response::unwrap_response_body;
pub use sse::SseRelay;
