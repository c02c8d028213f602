use std::{
    collections::HashMap,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{io::AsyncWriteExt, sync::Semaphore};
use url::Url;

use super::{SegmentFile, SegmentFileState, SegmentFileStore, TrackedSegmentFile};
use crate::{
    error::{DvrError, DvrResult},
    util::http::HttpClient,
};

/// Downloads segments into a local directory which is served from `public_url`.
///
/// Downloads are spawned on the current tokio runtime, so
/// [`SegmentFileStore::get_or_create`] must be called from within one.
pub struct HttpSegmentFileStore {
    client: HttpClient,
    output_dir: PathBuf,
    public_url: Url,
    permits: Arc<Semaphore>,

    files: Mutex<HashMap<Url, Arc<TrackedSegmentFile>>>,
    sequence: AtomicU64,
}

impl HttpSegmentFileStore {
    pub fn new(client: HttpClient, output_dir: impl Into<PathBuf>, mut public_url: Url) -> Self {
        if !public_url.path().ends_with('/') {
            let path = format!("{}/", public_url.path());
            public_url.set_path(&path);
        }

        Self {
            client,
            output_dir: output_dir.into(),
            public_url,
            permits: Arc::new(Semaphore::new(5)),

            files: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Limit the number of segments downloaded at the same time.
    pub fn with_concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.permits = Arc::new(Semaphore::new(concurrency.get() as usize));
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn file_name(&self, url: &Url) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = url
            .path_segments()
            .and_then(|mut c| c.next_back())
            .filter(|r| !r.is_empty())
            .unwrap_or("segment.ts");
        format!("{sequence:06}_{name}")
    }
}

impl SegmentFileStore for HttpSegmentFileStore {
    fn get_or_create(&self, url: Url) -> Arc<dyn SegmentFile> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(&url) {
            return file.clone();
        }

        let file = Arc::new(TrackedSegmentFile::new(url.clone()));
        files.insert(url, file.clone());
        drop(files);

        let file_name = self.file_name(file.url());
        let task = DownloadTask {
            client: self.client.clone(),
            file: file.clone(),
            path: self.output_dir.join(&file_name),
            delivery_url: self.public_url.join(&file_name),
            permits: self.permits.clone(),
        };
        tokio::spawn(task.run());

        file
    }
}

struct DownloadTask {
    client: HttpClient,
    file: Arc<TrackedSegmentFile>,
    path: PathBuf,
    delivery_url: Result<Url, url::ParseError>,
    permits: Arc<Semaphore>,
}

impl DownloadTask {
    async fn run(self) {
        let url = self.file.url().clone();
        let delivery_url = match self.delivery_url {
            Ok(delivery_url) => delivery_url,
            Err(e) => {
                tracing::error!("Can not build delivery url for {url}: {e}");
                self.file.transition(SegmentFileState::Failed, None);
                return;
            }
        };

        let Ok(_permit) = self.permits.acquire_owned().await else {
            self.file.transition(SegmentFileState::Failed, None);
            return;
        };

        self.file.transition(SegmentFileState::Downloading, None);
        match fetch_to_file(&self.client, &url, &self.path).await {
            Ok(size) => {
                tracing::info!("Downloaded {url} ({size} bytes) to {}", self.path.display());
                self.file
                    .transition(SegmentFileState::Downloaded, Some(delivery_url));
            }
            Err(e) => {
                tracing::error!("Downloading {url} failed: {e}");
                if tokio::fs::try_exists(&self.path).await.unwrap_or_default() {
                    _ = tokio::fs::remove_file(&self.path).await;
                }
                self.file.transition(SegmentFileState::Failed, None);
            }
        }
    }
}

async fn fetch_to_file(client: &HttpClient, url: &Url, path: &Path) -> DvrResult<u64> {
    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(DvrError::HttpError(response.status()));
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut output = tokio::fs::File::create(path).await?;
    let mut written = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        output.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    output.flush().await?;

    Ok(written)
}
