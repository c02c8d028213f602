use std::{future::Future, sync::Arc};

use url::Url;

use crate::{
    error::{DvrError, DvrResult},
    hls::utils::load_m3u8,
    util::http::HttpClient,
};

/// One media segment entry of a source playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistItem {
    /// Segment URI as written in the playlist, possibly relative.
    pub uri: String,
    /// Duration in seconds.
    pub duration: f32,
    pub discontinuity: bool,
}

/// Structured snapshot of a source media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistInfo {
    /// Location the media playlist was loaded from, used to resolve item URIs.
    pub url: Url,
    pub target_duration: f32,
    /// Media sequence number of the first item.
    pub media_sequence: u64,
    pub items: Vec<PlaylistItem>,
    /// Whether the source carries `#EXT-X-ENDLIST`.
    pub ended: bool,
}

impl PlaylistInfo {
    /// Resolve an item URI against the playlist location.
    pub fn segment_url(&self, item: &PlaylistItem) -> DvrResult<Url> {
        Ok(self.url.join(&item.uri)?)
    }
}

/// Fetches and parses the remote source playlist.
///
/// A call either yields the complete snapshot or fails as a unit.
pub trait PlaylistResolver: Send + Sync + 'static {
    fn resolve(&self, url: &Url) -> impl Future<Output = DvrResult<PlaylistInfo>> + Send;
}

impl<R> PlaylistResolver for Arc<R>
where
    R: PlaylistResolver,
{
    fn resolve(&self, url: &Url) -> impl Future<Output = DvrResult<PlaylistInfo>> + Send {
        self.as_ref().resolve(url)
    }
}

/// In-process resolver backed by `reqwest` and `m3u8-rs`.
#[derive(Clone, Default)]
pub struct HttpPlaylistResolver {
    client: HttpClient,
}

impl HttpPlaylistResolver {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl PlaylistResolver for HttpPlaylistResolver {
    async fn resolve(&self, url: &Url) -> DvrResult<PlaylistInfo> {
        let (url, playlist) = load_m3u8(&self.client, url.clone()).await?;

        let target_duration = playlist.target_duration as f32;
        if target_duration <= 0. {
            return Err(DvrError::MissingTargetDuration);
        }

        let items = playlist
            .segments
            .into_iter()
            .map(|segment| PlaylistItem {
                uri: segment.uri,
                duration: segment.duration,
                discontinuity: segment.discontinuity,
            })
            .collect();

        Ok(PlaylistInfo {
            url,
            target_duration,
            media_sequence: playlist.media_sequence,
            items,
            ended: playlist.end_list,
        })
    }
}
