//! Document state management and sentence segmentation.
//!
//! This module provides:
//! - `segment` and `Segmenter` for turning prose into positioned sentences
//! - `DocumentState` and `DocumentStore` for document lifecycle management

mod segment;
mod state;

pub use segment::{segment, SegmentState, Segmenter, Sentence};
pub use state::{DocumentState, DocumentStore};
