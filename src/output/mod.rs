//! Final stage of the pipeline: reshape the stored document for consumers
//! and hand it to a sink.

pub mod decorate;
pub mod publish;

pub use decorate::{build_decorator, Decorator};
pub use publish::{build_publisher, Publisher};
