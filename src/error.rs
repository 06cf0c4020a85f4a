use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading, fetching or parsing VAST documents
#[derive(Error, Debug)]
pub enum VastError {
    #[error("Failed to parse XML: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VastError>;

/// Why a resolution ended without a playable ad
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum ResolveError {
    #[error("document contained no ads")]
    NoAds,

    #[error("document was not a VAST response")]
    MalformedResponse,

    #[error("wrapper chain exceeded {max_hops} hops")]
    RedirectLimitExceeded { max_hops: usize },

    #[error("wrapper has no VASTAdTagURI")]
    MissingRedirect,

    #[error("failed to fetch {url} (status {status:?})")]
    FetchFailed { url: String, status: Option<u16> },

    #[error("no playable media file")]
    NoPlayableMedia,

    #[error("media cache is not initialized")]
    CacheUnavailable,

    #[error("resolution cancelled")]
    Cancelled,
}

/// Codes substituted into `[ERRORCODE]`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum VastErrorCode {
    XmlParsingError,
    WrapperTimeout,
    NoAdsVast,
    GeneralLinearAdError,
    Undefined,
    /// Transport status reported by the fetcher
    HttpStatus(u16),
}

impl VastErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            VastErrorCode::XmlParsingError => 100,
            VastErrorCode::WrapperTimeout => 301,
            VastErrorCode::NoAdsVast => 303,
            VastErrorCode::GeneralLinearAdError => 400,
            VastErrorCode::Undefined => 900,
            VastErrorCode::HttpStatus(status) => u32::from(*status),
        }
    }
}
