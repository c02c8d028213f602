use m3u8_rs::{MediaPlaylist, Playlist, VariantStream};
use reqwest::Url;

use crate::{
    error::{DvrError, DvrResult},
    util::http::HttpClient,
};

/// Fetch `url` once and parse it as a media playlist.
///
/// A master playlist is followed to its best variant. The returned url is the
/// one the media playlist was actually loaded from.
#[async_recursion::async_recursion]
pub async fn load_m3u8(client: &HttpClient, url: Url) -> DvrResult<(Url, MediaPlaylist)> {
    tracing::debug!("Fetching M3U8 file {url}");

    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(DvrError::HttpError(response.status()));
    }
    let m3u8_bytes = response.bytes().await?;
    let m3u8_parsed = m3u8_rs::parse_playlist_res(&m3u8_bytes)
        .map_err(|error| DvrError::M3u8ParseError(error.to_string()))?;

    match m3u8_parsed {
        Playlist::MasterPlaylist(pl) => {
            tracing::info!("Master playlist input detected. Auto selecting best quality stream.");
            let variant = select_variant(pl.variants).ok_or(DvrError::NoVariant)?;
            let variant_url = url.join(&variant.uri)?;

            tracing::info!(
                "Best stream: {variant_url}; Bandwidth: {bandwidth}",
                bandwidth = variant.bandwidth
            );
            load_m3u8(client, variant_url).await
        }
        Playlist::MediaPlaylist(pl) => Ok((url, pl)),
    }
}

fn select_variant(mut variants: Vec<VariantStream>) -> Option<VariantStream> {
    variants.retain(|v| !v.is_i_frame);
    variants.sort_by(|a, b| {
        // compare resolution first
        if let (Some(a), Some(b)) = (a.resolution, b.resolution) {
            if a.width != b.width {
                return b.width.cmp(&a.width);
            }
        }

        // compare framerate then
        if let (Some(a), Some(b)) = (a.frame_rate, b.frame_rate) {
            let a = a as u64;
            let b = b as u64;
            if a != b {
                return b.cmp(&a);
            }
        }

        // compare bandwidth finally
        b.bandwidth.cmp(&a.bandwidth)
    });
    variants.into_iter().next()
}
