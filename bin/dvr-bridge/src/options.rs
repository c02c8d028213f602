use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use clap::Args;
use dvr::HttpClient;
use fake_user_agent::get_chrome_rua;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use url::Url;

#[derive(Args, Clone, Debug)]
pub struct HttpOptions {
    /// Additional HTTP headers, eg. "Referer: https://example.com"
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookies sent with playlist and segment requests
    #[clap(long)]
    pub cookies: Option<String>,

    /// HTTP timeout, in seconds
    #[clap(short, long, default_value = "10")]
    pub timeout: u64,
}

impl HttpOptions {
    pub fn into_client(self, url: &Url) -> anyhow::Result<HttpClient> {
        let mut headers = HeaderMap::new();

        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim()).context("Invalid header name")?,
                HeaderValue::from_str(value.trim()).context("Invalid header value")?,
            );
        }

        let builder = Client::builder()
            .default_headers(headers)
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(self.timeout));
        let client = HttpClient::new(builder)?;

        if let Some(cookies) = self.cookies {
            let cookies = cookies.split(';').map(|c| c.trim().to_string()).collect();
            client.add_cookies(cookies, url.clone())?;
        }

        Ok(client)
    }
}

#[derive(Args, Clone, Debug)]
pub struct CaptureOptions {
    /// Interval between two polls of the source playlist, in milliseconds
    #[clap(long, default_value = "2000")]
    pub interval: u64,

    /// Segments downloaded at the same time
    #[clap(long, alias = "threads", default_value = "5")]
    pub concurrency: NonZeroU32,
}

#[derive(Args, Clone, Debug)]
pub struct OutputOptions {
    /// Directory receiving segments, the playlist and the capture summary
    #[clap(short, long, env = "DVR_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Public url the output directory is served from
    #[clap(long, env = "DVR_PUBLIC_URL")]
    pub public_url: Url,

    /// Name of the generated playlist
    #[clap(long, default_value = "playlist.m3u8")]
    pub playlist_name: String,
}

impl OutputOptions {
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(&self.playlist_name)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("capture.json")
    }
}
