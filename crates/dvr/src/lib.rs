pub mod capture;
pub mod config;
pub mod error;
pub mod hls;
pub mod store;
pub mod util;

pub use capture::{CaptureState, CaptureSummary, PlaylistCapture, StopReason};
pub use config::CaptureConfig;
pub use error::*;
pub use hls::{HttpPlaylistResolver, PlaylistInfo, PlaylistItem, PlaylistResolver};
pub use store::{
    HttpSegmentFileStore, ListenerId, SegmentFile, SegmentFileState, SegmentFileStore,
    StateListener, TrackedSegmentFile,
};
pub use util::http::HttpClient;
