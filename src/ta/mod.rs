//! Technical analysis: pure indicator primitives plus signal detection and quality scoring.

pub mod engine;
pub mod primitives;

pub use engine::{calculate_quality, detect_signal, DetectedSignal};
