//! Pipeline stages: metadata extraction and detection

mod detect;
mod extract;

pub use detect::simulate_detections;
pub use extract::{extract_technical, ExtractError};
