use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
};

/// Sole owner of the output playlist file.
///
/// Rewrites the file on every published playlist until finished, then writes
/// the latest content one last time.
pub struct PlaylistWriter {
    done: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl PlaylistWriter {
    pub fn spawn(updates: watch::Receiver<Option<Arc<str>>>, path: PathBuf) -> Self {
        let (done, finished) = oneshot::channel();
        let task = tokio::spawn(write_playlist(updates, path, finished));
        Self { done, task }
    }

    /// Flush the latest playlist and wait for the writer to exit.
    pub async fn finish(self) -> anyhow::Result<()> {
        _ = self.done.send(());
        self.task.await?
    }
}

async fn write_playlist(
    mut updates: watch::Receiver<Option<Arc<str>>>,
    path: PathBuf,
    mut finished: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let mut last = false;
    loop {
        let content = updates.borrow_and_update().clone();
        if let Some(content) = content {
            write_atomic(&path, &content).await?;
            tracing::debug!("Playlist written to {}", path.display());
        }
        if last {
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut finished => last = true,
        }
    }
    Ok(())
}

/// Write then rename, readers never see a partial playlist.
async fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, content.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
