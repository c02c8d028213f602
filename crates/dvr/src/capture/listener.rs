use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock, Weak,
};

use super::{segment::Segment, CaptureShared};
use crate::{
    hls::PlaylistResolver,
    store::{ListenerId, SegmentFileState, SegmentFileStore},
};

/// Waits for the download of one segment to settle.
///
/// The state read right after subscribing and the store's own notification
/// may race. Whichever reports a terminal state first flips `handled`, every
/// later observation is ignored.
pub(crate) struct CompletionHandler<R, S> {
    capture: Weak<CaptureShared<R, S>>,
    segment: Arc<Segment>,
    handled: AtomicBool,
    listener: OnceLock<ListenerId>,
}

impl<R, S> CompletionHandler<R, S>
where
    R: PlaylistResolver,
    S: SegmentFileStore,
{
    pub fn attach(capture: Weak<CaptureShared<R, S>>, segment: Arc<Segment>) -> Arc<Self> {
        let handler = Arc::new(Self {
            capture,
            segment,
            handled: AtomicBool::new(false),
            listener: OnceLock::new(),
        });

        let file = handler.segment.file().clone();
        let notified = handler.clone();
        let id = file.subscribe(Arc::new(move |state| notified.observe(state)));
        _ = handler.listener.set(id);

        handler.observe(file.state());
        if handler.is_handled() {
            file.unsubscribe(id);
        }
        handler
    }

    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }

    /// Stop listening without handling the outcome.
    pub fn detach(&self) {
        if let Some(id) = self.listener.get() {
            self.segment.file().unsubscribe(*id);
        }
    }

    fn observe(&self, state: SegmentFileState) {
        if !state.is_terminal() {
            return;
        }
        if self.handled.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(capture) = self.capture.upgrade() {
            match state {
                SegmentFileState::Downloaded => capture.segment_downloaded(&self.segment),
                SegmentFileState::Failed => capture.segment_failed(&self.segment),
                SegmentFileState::Pending | SegmentFileState::Downloading => {}
            }
        }

        if let Some(id) = self.listener.get() {
            self.segment.file().unsubscribe(*id);
        }
    }
}
