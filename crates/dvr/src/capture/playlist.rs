use std::{fmt::Write, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::watch;

use super::segment::Segment;
use crate::store::SegmentFileState;

struct GeneratorState {
    target_duration: Option<f32>,
    segments: Vec<Arc<Segment>>,
    finished: bool,
}

/// Builds the output playlist and publishes it when it changes.
///
/// Guarded by its own lock so download callbacks never wait for the capture
/// state lock. Lock order is always capture state first, generator second.
pub(crate) struct PlaylistGenerator {
    state: Mutex<GeneratorState>,
    content: watch::Sender<Option<Arc<str>>>,
}

impl PlaylistGenerator {
    pub fn new() -> Self {
        let (content, _) = watch::channel(None);
        Self {
            state: Mutex::new(GeneratorState {
                target_duration: None,
                segments: Vec::new(),
                finished: false,
            }),
            content,
        }
    }

    /// Set the target duration and publish the header-only playlist.
    pub fn begin(&self, target_duration: f32) {
        let mut state = self.state.lock();
        state.target_duration = Some(target_duration);
        self.publish(&state);
    }

    pub fn append(&self, segment: Arc<Segment>) {
        self.state.lock().segments.push(segment);
    }

    /// Mark the capture as stopped and regenerate.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.publish(&state);
    }

    /// Rebuild the playlist, returns whether the content changed.
    pub fn regenerate(&self) -> bool {
        let state = self.state.lock();
        self.publish(&state)
    }

    pub fn content(&self) -> Option<Arc<str>> {
        self.content.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<str>>> {
        self.content.subscribe()
    }

    fn publish(&self, state: &GeneratorState) -> bool {
        let Some(target_duration) = state.target_duration else {
            return false;
        };
        let rendered = render(target_duration, &state.segments, state.finished);

        self.content.send_if_modified(|current| {
            if current.as_deref() == Some(rendered.as_str()) {
                return false;
            }
            *current = Some(Arc::from(rendered));
            true
        })
    }
}

/// Render an EVENT playlist from the captured segments.
///
/// The walk stops at the first segment that is not downloaded. A failed
/// segment ends the playable run for good, a pending one only withholds the
/// tail until it completes. The end marker is written once the capture is
/// finished and nothing is withheld.
pub(crate) fn render(target_duration: f32, segments: &[Arc<Segment>], finished: bool) -> String {
    let mut contents = String::new();
    _ = writeln!(contents, "#EXTM3U");
    _ = writeln!(contents, "#EXT-X-PLAYLIST-TYPE:EVENT");
    _ = writeln!(
        contents,
        "#EXT-X-TARGETDURATION:{}",
        target_duration.ceil() as u64
    );
    _ = writeln!(contents, "#EXT-X-MEDIA-SEQUENCE:0");

    let mut withheld = false;
    for segment in segments {
        let file = segment.file();
        match file.state() {
            SegmentFileState::Failed => break,
            SegmentFileState::Downloaded => {}
            SegmentFileState::Pending | SegmentFileState::Downloading => {
                withheld = true;
                break;
            }
        }
        let Some(resolved_url) = file.resolved_url() else {
            withheld = true;
            break;
        };

        if segment.discontinuity() {
            _ = writeln!(contents, "#EXT-X-DISCONTINUITY");
        }
        _ = writeln!(contents, "#EXTINF:{},", segment.duration());
        _ = writeln!(contents, "{resolved_url}");
    }

    if finished && !withheld {
        _ = writeln!(contents, "#EXT-X-ENDLIST");
    }

    contents
}
