use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use url::Url;

use super::{ListenerId, SegmentFile, SegmentFileState, StateListener};

struct FileStatus {
    state: SegmentFileState,
    resolved_url: Option<Url>,
}

/// A segment file handle that tracks its own state and notifies listeners.
///
/// Stores drive it with [`TrackedSegmentFile::transition`].
pub struct TrackedSegmentFile {
    url: Url,
    status: Mutex<FileStatus>,
    listeners: Mutex<Vec<(ListenerId, StateListener)>>,
    next_listener: AtomicU64,
    // serializes deliveries so listeners observe transitions in order
    delivery: Mutex<()>,
}

impl TrackedSegmentFile {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            status: Mutex::new(FileStatus {
                state: SegmentFileState::Pending,
                resolved_url: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            delivery: Mutex::new(()),
        }
    }

    /// Move to `state` and notify every listener.
    ///
    /// Transitions out of a terminal state are ignored. `resolved_url` is kept
    /// only when moving to [`SegmentFileState::Downloaded`].
    pub fn transition(&self, state: SegmentFileState, resolved_url: Option<Url>) {
        let _delivery = self.delivery.lock();
        {
            let mut status = self.status.lock();
            if status.state.is_terminal() {
                tracing::warn!(
                    "Ignoring transition of {} from {} to {state}",
                    self.url,
                    status.state
                );
                return;
            }
            status.state = state;
            if state == SegmentFileState::Downloaded {
                status.resolved_url = resolved_url;
            }
        }

        // listeners may unsubscribe themselves, never call them under the lock
        let listeners: Vec<StateListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(state);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl SegmentFile for TrackedSegmentFile {
    fn url(&self) -> &Url {
        &self.url
    }

    fn state(&self) -> SegmentFileState {
        self.status.lock().state
    }

    fn resolved_url(&self) -> Option<Url> {
        let status = self.status.lock();
        match status.state {
            SegmentFileState::Downloaded => status.resolved_url.clone(),
            _ => None,
        }
    }

    fn subscribe(&self, listener: StateListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|(i, _)| *i != id);
    }
}
