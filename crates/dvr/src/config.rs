use std::time::Duration;

const MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Delay between two polls of the source playlist.
    pub update_interval: Duration,
}

impl CaptureConfig {
    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.update_interval.max(MIN_UPDATE_INTERVAL)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(2),
        }
    }
}
