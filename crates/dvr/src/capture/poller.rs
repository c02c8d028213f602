use std::{sync::Weak, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::CaptureShared;
use crate::{hls::PlaylistResolver, store::SegmentFileStore};

/// Poll the source playlist every `period`, starting immediately.
///
/// Once `cancel` fires no new tick is started. A tick already running is left
/// to finish and becomes a no-op at its next state check.
pub(crate) fn spawn<R, S>(
    capture: Weak<CaptureShared<R, S>>,
    period: Duration,
    cancel: CancellationToken,
)
where
    R: PlaylistResolver,
    S: SegmentFileStore,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(capture) = capture.upgrade() else {
                break;
            };
            capture.poll().await;
        }

        tracing::debug!("Playlist poller exited.");
    });
}
