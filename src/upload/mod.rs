//! Upload pipeline.
//!
//! A scheduler task reads the inbound stream sequentially and slices it into
//! offset-tagged chunks on a bounded queue. A fixed pool of workers writes the
//! chunks into a preallocated temp file in whatever order they finish. The
//! caller's loop counts completed bytes and aborts when the stream fails, ends
//! short, or no chunk completes within the idle window.

mod pipeline;
mod worker;

pub use crate::config::UploadConfig;
pub use pipeline::{UploadPipeline, TEMP_SUFFIX};
