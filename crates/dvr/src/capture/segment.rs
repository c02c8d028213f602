use std::{fmt, sync::Arc};

use crate::{hls::PlaylistItem, store::SegmentFile};

/// A captured segment. Immutable once created.
#[derive(Clone)]
pub struct Segment {
    sequence: u64,
    duration: f32,
    discontinuity: bool,
    file: Arc<dyn SegmentFile>,
}

impl Segment {
    pub(crate) fn new(sequence: u64, item: &PlaylistItem, file: Arc<dyn SegmentFile>) -> Self {
        Self {
            sequence,
            duration: item.duration,
            discontinuity: item.discontinuity,
            file,
        }
    }

    /// Absolute media sequence number in the source playlist.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn discontinuity(&self) -> bool {
        self.discontinuity
    }

    pub fn file(&self) -> &Arc<dyn SegmentFile> {
        &self.file
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("discontinuity", &self.discontinuity)
            .field("url", &self.file.url().as_str())
            .field("state", &self.file.state())
            .finish()
    }
}

/// Select the items of a playlist snapshot that have not been captured yet.
///
/// Without a `next_sequence` only the newest item is taken, the backlog of the
/// source is never ingested retroactively.
pub(crate) fn new_items(
    media_sequence: u64,
    items: &[PlaylistItem],
    next_sequence: Option<u64>,
) -> Vec<(u64, &PlaylistItem)> {
    match next_sequence {
        Some(next_sequence) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (media_sequence + i as u64, item))
            .filter(|(sequence, _)| *sequence >= next_sequence)
            .collect(),
        None => items
            .last()
            .map(|item| (media_sequence + items.len() as u64 - 1, item))
            .into_iter()
            .collect(),
    }
}
