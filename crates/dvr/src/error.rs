use thiserror::Error;

use crate::capture::CaptureState;

#[derive(Error, Debug)]
pub enum DvrError {
    #[error("Invalid capture state: expected {expected}, found {actual}")]
    InvalidCaptureState {
        expected: CaptureState,
        actual: CaptureState,
    },

    #[error("Capture not started yet")]
    NotStarted,

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Invalid m3u8 file: {0}")]
    M3u8ParseError(String),

    #[error("Master playlist contains no variant")]
    NoVariant,

    #[error("Playlist does not declare a target duration")]
    MissingTargetDuration,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl DvrError {
    /// Whether this error means the source playlist could not be requested or understood.
    pub fn is_playlist_request_error(&self) -> bool {
        matches!(
            self,
            DvrError::HttpError(_)
                | DvrError::M3u8ParseError(_)
                | DvrError::NoVariant
                | DvrError::MissingTargetDuration
                | DvrError::RequestError(_)
                | DvrError::UrlParseError(_)
        )
    }
}

pub type DvrResult<T> = Result<T, DvrError>;
