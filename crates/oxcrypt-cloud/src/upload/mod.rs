//! Segmented uploads of large objects

pub mod config;
pub mod engine;
pub mod segment;
pub mod source;

pub use config::UploadConfig;
pub use engine::{SegmentedUpload, UploadSummary};
pub use segment::{Manifest, ManifestEntry, SEGMENTS_DIRECTORY, Segment, SegmentService, SegmentState};
pub use source::{FileSource, UploadSource};
