mod listener;
mod playlist;
mod poller;
mod segment;

pub use segment::Segment;

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

use self::{listener::CompletionHandler, playlist::PlaylistGenerator, segment::new_items};
use crate::{
    config::CaptureConfig,
    error::{DvrError, DvrResult},
    hls::PlaylistResolver,
    store::{SegmentFileState, SegmentFileStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    NotStarted,
    Capturing,
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::NotStarted => "not started",
            CaptureState::Capturing => "capturing",
            CaptureState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a capture left the capturing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// [`PlaylistCapture::stop`] was called.
    Requested,
    /// The source playlist could not be fetched or parsed during a poll.
    SourceUnavailable,
    /// A segment download failed.
    SegmentFailed,
    /// A segment URI could not be resolved against the source playlist.
    MalformedSegment,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureSummary {
    pub url: Url,
    pub state: CaptureState,
    pub stop_reason: Option<StopReason>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub segments: usize,
    pub downloaded_segments: usize,
}

struct CaptureInner {
    state: CaptureState,
    started_at: Option<(DateTime<Utc>, Instant)>,
    stopped_at: Option<Instant>,
    stop_reason: Option<StopReason>,
    segments: Vec<Arc<Segment>>,
}

pub(crate) struct CaptureShared<R, S> {
    url: Url,
    config: CaptureConfig,
    resolver: R,
    store: S,

    inner: Mutex<CaptureInner>,
    generator: PlaylistGenerator,
    stopped: CancellationToken,
    // unsettled downloads, `None` once the capture is dropped
    handlers: Mutex<Option<Vec<Arc<CompletionHandler<R, S>>>>>,
}

/// A recording of one live HLS playlist.
///
/// ┌───────────────────────┐   resolve    ┌────────────────────┐
/// │                       ├──────────────►                    │
/// │     Update Poller     │              │  PlaylistResolver  │
/// │                       ◄──────────────┤                    │
/// └───────────┬───────────┘  new items   └────────────────────┘
///             │ append
/// ┌───────────▼───────────┐ get_or_create┌────────────────────┐
/// │                       ├──────────────►                    │
/// │    PlaylistCapture    │              │  SegmentFileStore  │
/// │   [state, segments]   ◄──────────────┤                    │
/// └───────────┬───────────┘  Downloaded  └────────────────────┘
///             │ regenerate    / Failed
/// ┌───────────▼───────────┐
/// │   PlaylistGenerator   ├──────────────► watch::Receiver
/// └───────────────────────┘
///
/// A capture is started once and stopped once, either by [`PlaylistCapture::stop`]
/// or internally when the source or a segment download fails. The output is an
/// EVENT playlist which only grows while capturing and gets its end marker once
/// stopped with every captured segment downloaded.
pub struct PlaylistCapture<R, S>
where
    R: PlaylistResolver,
    S: SegmentFileStore,
{
    shared: Arc<CaptureShared<R, S>>,
}

impl<R, S> PlaylistCapture<R, S>
where
    R: PlaylistResolver,
    S: SegmentFileStore,
{
    pub fn new(url: Url, resolver: R, store: S, config: CaptureConfig) -> Self {
        Self {
            shared: Arc::new(CaptureShared {
                url,
                config,
                resolver,
                store,

                inner: Mutex::new(CaptureInner {
                    state: CaptureState::NotStarted,
                    started_at: None,
                    stopped_at: None,
                    stop_reason: None,
                    segments: Vec::new(),
                }),
                generator: PlaylistGenerator::new(),
                stopped: CancellationToken::new(),
                handlers: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    /// Start capturing. This can only be done once.
    ///
    /// Returns `Ok(false)` and stays not started when the source playlist can
    /// not be retrieved. Must be called within a tokio runtime.
    pub async fn start(&self) -> DvrResult<bool> {
        let shared = &self.shared;
        shared.ensure_state(CaptureState::NotStarted)?;

        let info = match shared.resolver.resolve(&shared.url).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    "An error occurred retrieving the playlist {} so capture could not be started: {e}",
                    shared.url
                );
                return Ok(false);
            }
        };

        let mut inner = shared.inner.lock();
        if inner.state != CaptureState::NotStarted {
            return Err(DvrError::InvalidCaptureState {
                expected: CaptureState::NotStarted,
                actual: inner.state,
            });
        }
        inner.state = CaptureState::Capturing;
        inner.started_at = Some((Utc::now(), Instant::now()));
        shared.generator.begin(info.target_duration);
        poller::spawn(
            Arc::downgrade(shared),
            shared.config.poll_interval(),
            shared.stopped.clone(),
        );

        tracing::info!(
            "Capture of {} started, target duration {}s.",
            shared.url,
            info.target_duration
        );
        Ok(true)
    }

    /// Stop capturing.
    ///
    /// Stopping a capture which already stopped because of a failure is a no-op.
    pub fn stop(&self) -> DvrResult<()> {
        let mut inner = self.shared.inner.lock();
        match (inner.state, inner.stop_reason) {
            (CaptureState::Capturing, _) => {
                self.shared.stop_locked(&mut inner, StopReason::Requested);
                Ok(())
            }
            (CaptureState::Stopped, Some(reason)) if reason != StopReason::Requested => {
                tracing::debug!("Capture of {} already stopped: {reason:?}", self.shared.url);
                Ok(())
            }
            (actual, _) => Err(DvrError::InvalidCaptureState {
                expected: CaptureState::Capturing,
                actual,
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.inner.lock().state
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.inner.lock().stop_reason
    }

    /// Wall clock time the capture started at.
    pub fn capture_start_time(&self) -> DvrResult<DateTime<Utc>> {
        let inner = self.shared.inner.lock();
        inner
            .started_at
            .map(|(started_at, _)| started_at)
            .ok_or(DvrError::NotStarted)
    }

    /// Time captured so far. It stops growing once the capture is stopped.
    pub fn capture_duration(&self) -> DvrResult<Duration> {
        let inner = self.shared.inner.lock();
        inner.duration().ok_or(DvrError::NotStarted)
    }

    /// The latest generated playlist.
    pub fn current_content(&self) -> DvrResult<Arc<str>> {
        self.shared.generator.content().ok_or(DvrError::NotStarted)
    }

    /// Receiver notified every time [`PlaylistCapture::current_content`] changes.
    ///
    /// Holds `None` until the capture is started.
    pub fn updates(&self) -> watch::Receiver<Option<Arc<str>>> {
        self.shared.generator.subscribe()
    }

    /// Segments captured so far, in sequence order.
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.shared.inner.lock().segments.clone()
    }

    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    pub fn summary(&self) -> DvrResult<CaptureSummary> {
        let inner = self.shared.inner.lock();
        let (started_at, _) = inner.started_at.ok_or(DvrError::NotStarted)?;
        let duration = inner.duration().unwrap_or_default();
        let downloaded_segments = inner
            .segments
            .iter()
            .filter(|s| s.file().state() == SegmentFileState::Downloaded)
            .count();

        Ok(CaptureSummary {
            url: self.shared.url.clone(),
            state: inner.state,
            stop_reason: inner.stop_reason,
            started_at,
            duration_secs: duration.as_secs_f64(),
            segments: inner.segments.len(),
            downloaded_segments,
        })
    }

    /// Resolves once the capture has stopped, for whatever reason.
    pub async fn wait_stopped(&self) {
        self.shared.stopped.cancelled().await
    }
}

impl<R, S> Drop for PlaylistCapture<R, S>
where
    R: PlaylistResolver,
    S: SegmentFileStore,
{
    fn drop(&mut self) {
        self.shared.stopped.cancel();

        // release the listeners of downloads still in flight
        let handlers = self.shared.handlers.lock().take().unwrap_or_default();
        for handler in handlers {
            handler.detach();
        }
    }
}

impl CaptureInner {
    fn duration(&self) -> Option<Duration> {
        let (_, started) = self.started_at?;
        let end = self.stopped_at.unwrap_or_else(Instant::now);
        Some(end.saturating_duration_since(started))
    }
}

impl<R, S> CaptureShared<R, S>
where
    R: PlaylistResolver,
    S: SegmentFileStore,
{
    fn ensure_state(&self, expected: CaptureState) -> DvrResult<()> {
        let actual = self.inner.lock().state;
        if actual != expected {
            return Err(DvrError::InvalidCaptureState { expected, actual });
        }
        Ok(())
    }

    fn stop_locked(&self, inner: &mut CaptureInner, reason: StopReason) {
        inner.state = CaptureState::Stopped;
        inner.stop_reason = Some(reason);
        inner.stopped_at = Some(Instant::now());
        self.generator.finish();
        self.stopped.cancel();

        tracing::info!(
            "Capture of {} stopped ({reason:?}) with {} segments.",
            self.url,
            inner.segments.len()
        );
    }

    /// Stop unless the capture already left the capturing state.
    fn stop_internal(&self, reason: StopReason) {
        let mut inner = self.inner.lock();
        if inner.state == CaptureState::Capturing {
            self.stop_locked(&mut inner, reason);
        }
    }

    /// One reconciliation pass against the source playlist.
    async fn poll(self: &Arc<Self>) {
        let next_sequence = {
            let inner = self.inner.lock();
            if inner.state != CaptureState::Capturing {
                return;
            }
            inner.segments.last().map(|s| s.sequence() + 1)
        };

        // the lock is released while fetching, only this task appends segments
        let info = match self.resolver.resolve(&self.url).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Error retrieving playlist {} so capture stopped: {e}", self.url);
                self.stop_internal(StopReason::SourceUnavailable);
                return;
            }
        };

        let mut created = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != CaptureState::Capturing {
                return;
            }

            let items = new_items(info.media_sequence, &info.items, next_sequence);
            if let (Some(expected), Some((first, _))) = (next_sequence, items.first()) {
                if *first > expected {
                    tracing::warn!(
                        "Source playlist skipped from sequence {expected} to {first}, segments were missed."
                    );
                }
            }

            for (sequence, item) in items {
                let url = match info.segment_url(item) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::error!(
                            "Invalid segment uri {} in playlist {} so capture stopped: {e}",
                            item.uri,
                            info.url
                        );
                        self.stop_locked(&mut inner, StopReason::MalformedSegment);
                        break;
                    }
                };

                let file = self.store.get_or_create(url);
                let segment = Arc::new(Segment::new(sequence, item, file));
                inner.segments.push(segment.clone());
                self.generator.append(segment.clone());
                created.push(segment);
            }
        }

        if !created.is_empty() {
            tracing::info!(
                "{} new segments were captured from {}.",
                created.len(),
                self.url
            );
        }
        if info.ended {
            tracing::info!("Source playlist {} has ended.", self.url);
        }

        // subscribe outside the state lock, a failure callback may need it
        let weak: Weak<Self> = Arc::downgrade(self);
        for segment in created {
            let handler = CompletionHandler::attach(weak.clone(), segment);
            if handler.is_handled() {
                continue;
            }

            let dropped = {
                let mut handlers = self.handlers.lock();
                match handlers.as_mut() {
                    Some(pending) => {
                        pending.retain(|h| !h.is_handled());
                        pending.push(handler);
                        None
                    }
                    None => Some(handler),
                }
            };
            if let Some(handler) = dropped {
                handler.detach();
            }
        }
    }

    fn segment_downloaded(&self, segment: &Segment) {
        tracing::debug!("Segment {} downloaded.", segment.sequence());
        self.generator.regenerate();
    }

    fn segment_failed(&self, segment: &Segment) {
        tracing::warn!(
            "Error downloading segment {} ({}) so stopping capture.",
            segment.sequence(),
            segment.file().url()
        );
        self.stop_internal(StopReason::SegmentFailed);
    }
}
