mod file;
mod http;

pub use file::TrackedSegmentFile;
pub use http::HttpSegmentFileStore;

use std::{fmt, sync::Arc};

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentFileState {
    Pending,
    Downloading,
    Downloaded,
    Failed,
}

impl SegmentFileState {
    /// Downloaded and Failed are final, no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, SegmentFileState::Downloaded | SegmentFileState::Failed)
    }
}

impl fmt::Display for SegmentFileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentFileState::Pending => "pending",
            SegmentFileState::Downloading => "downloading",
            SegmentFileState::Downloaded => "downloaded",
            SegmentFileState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Handle returned by [`SegmentFile::subscribe`], chosen by the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

impl ListenerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ListenerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Callback invoked with every state a segment file moves to.
///
/// It may run on any thread, concurrently with other listeners.
pub type StateListener = Arc<dyn Fn(SegmentFileState) + Send + Sync>;

/// A segment file owned by a [`SegmentFileStore`].
pub trait SegmentFile: Send + Sync {
    /// Absolute source url of the segment.
    fn url(&self) -> &Url;

    fn state(&self) -> SegmentFileState;

    /// Url the downloaded file is delivered from. Only available once downloaded.
    fn resolved_url(&self) -> Option<Url>;

    /// Register a listener. Every later transition is delivered at least once.
    /// Implementations may also deliver the current state before returning.
    fn subscribe(&self, listener: StateListener) -> ListenerId;

    /// Remove a listener. Removing an unknown id does nothing.
    fn unsubscribe(&self, id: ListenerId);
}

/// Deduplicates and downloads segment files by url.
pub trait SegmentFileStore: Send + Sync + 'static {
    /// Get the file for `url`, scheduling its download on first request.
    fn get_or_create(&self, url: Url) -> Arc<dyn SegmentFile>;
}

impl<S> SegmentFileStore for Arc<S>
where
    S: SegmentFileStore,
{
    fn get_or_create(&self, url: Url) -> Arc<dyn SegmentFile> {
        self.as_ref().get_or_create(url)
    }
}
