use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoriError {
    /// Malformed XML or DASH structure.
    #[error("Invalid manifest: {0}")]
    ManifestParse(String),

    /// Structurally valid, but nothing in it can be played.
    #[error("Unplayable manifest: {0}")]
    ManifestContent(String),

    #[error("Fragment download failed with status {status}: {url}")]
    FragmentDownload { url: String, status: u16 },

    #[error("Seek position {position}s is outside the available range [0, {duration}s]")]
    SeekRange { position: f64, duration: f64 },

    #[error("Transient network failure: {0}")]
    NetworkTransient(String),

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Invalid segment index box: {0}")]
    InvalidIndexBox(String),

    #[error("Invalid timing schema: {0}")]
    InvalidTimingSchema(String),

    #[error("Invalid date time: {0}")]
    DateTimeParsing(String),

    #[error("Playback aborted")]
    Aborted,

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    ChronoParseError(#[from] chrono::ParseError),

    #[error(transparent)]
    ChronoOutOfRange(#[from] chrono::OutOfRangeError),

    #[error(transparent)]
    ConfigError(#[from] toml::de::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Error codes surfaced to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    ManifestParse,
    ManifestContent,
    FragmentDownload,
    SeekRange,
    NetworkTransient,
    Other,
}

impl ErrorKind {
    /// Whether an error of this kind ends the current tune.
    ///
    /// Fragment download errors only reach the caller once the retry bound has been
    /// exhausted, so they are fatal by the time they are observed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ManifestParse | Self::ManifestContent | Self::FragmentDownload
        )
    }
}

impl IoriError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ManifestParse(_) | Self::MpdParseError(_) => ErrorKind::ManifestParse,
            Self::ManifestContent(_) => ErrorKind::ManifestContent,
            Self::FragmentDownload { .. } => ErrorKind::FragmentDownload,
            Self::SeekRange { .. } => ErrorKind::SeekRange,
            Self::NetworkTransient(_) | Self::RequestError(_) | Self::HttpError(_) => {
                ErrorKind::NetworkTransient
            }
            _ => ErrorKind::Other,
        }
    }
}

pub type IoriResult<T> = Result<T, IoriError>;
