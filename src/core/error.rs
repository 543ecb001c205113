//! Crate-wide error type.
//!
//! Every fallible public function returns `Result<T>`. `Error` carries an
//! `ErrorCode` so callers can match on the failure class (spec §6.4)
//! without parsing message text, the same way the C library returns
//! `(code, short_message, long_message)` triples.

use thiserror::Error;

/// Convenience Result type for librepo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure classification, mirrored from the original library's
/// error enum. Used by callers to decide whether a failure is retryable
/// on another mirror, fatal to the whole fetch, or purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadFuncArg,
    BadOptArg,
    UnknownOpt,
    AlreadyUsedResult,
    IncompleteResult,
    Curl,
    CurlM,
    BadStatus,
    TemporaryErr,
    Select,
    Interrupted,
    BadChecksum,
    UnknownChecksum,
    RepomdXml,
    MlBad,
    MlXml,
    BadGpg,
    GpgNotSupported,
    IncompleteRepo,
    Io,
    CannotCreateDir,
    CannotCreateTmp,
    NotLocal,
    XmlParser,
    NoUrl,
    BadUrl,
    AlreadyDownloaded,
    Unfinished,
    CbInterrupted,
    UnknownError,
}

/// An error produced by the core. Implements [`std::error::Error`] via
/// `thiserror` and exposes its [`ErrorCode`] for structured matching.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad function argument: {0}")]
    BadFuncArg(String),

    #[error("bad option argument: {0}")]
    BadOptArg(String),

    #[error("unknown option: {0}")]
    UnknownOpt(String),

    #[error("result was already used for a previous perform()")]
    AlreadyUsedResult,

    #[error("incomplete result: {0}")]
    IncompleteResult(String),

    #[error("transport error: {0}")]
    Curl(#[from] reqwest::Error),

    #[error("transfer multiplexing error: {0}")]
    CurlM(String),

    #[error("unexpected HTTP status {status} fetching {url}")]
    BadStatus { status: u16, url: String },

    #[error("temporary transport error: {0}")]
    TemporaryErr(String),

    #[error("select/poll error: {0}")]
    Select(String),

    #[error("fetch interrupted")]
    Interrupted,

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    BadChecksum {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("unknown checksum algorithm: {0}")]
    UnknownChecksum(String),

    #[error("malformed repomd.xml: {0}")]
    RepomdXml(String),

    #[error("malformed mirrorlist: {0}")]
    MlBad(String),

    #[error("malformed metalink XML: {0}")]
    MlXml(String),

    #[error("GPG signature verification failed: {0}")]
    BadGpg(String),

    #[error("GPG support was not compiled in (enable the `gpg` feature)")]
    GpgNotSupported,

    #[error("incomplete repository: {0}")]
    IncompleteRepo(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot create directory {0}")]
    CannotCreateDir(String),

    #[error("cannot create temporary file: {0}")]
    CannotCreateTmp(String),

    #[error("{0} is not a local path")]
    NotLocal(String),

    #[error("XML parser error: {0}")]
    XmlParser(String),

    #[error("no usable mirror/base URL was configured")]
    NoUrl,

    #[error("bad URL: {0}")]
    BadUrl(String),

    #[error("already downloaded: {0}")]
    AlreadyDownloaded(String),

    #[error("transfer did not finish")]
    Unfinished,

    #[error("a callback requested cancellation")]
    CbInterrupted,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error per spec §6.4 / §7.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::BadFuncArg(_) => ErrorCode::BadFuncArg,
            Error::BadOptArg(_) => ErrorCode::BadOptArg,
            Error::UnknownOpt(_) => ErrorCode::UnknownOpt,
            Error::AlreadyUsedResult => ErrorCode::AlreadyUsedResult,
            Error::IncompleteResult(_) => ErrorCode::IncompleteResult,
            Error::Curl(_) => ErrorCode::Curl,
            Error::CurlM(_) => ErrorCode::CurlM,
            Error::BadStatus { .. } => ErrorCode::BadStatus,
            Error::TemporaryErr(_) => ErrorCode::TemporaryErr,
            Error::Select(_) => ErrorCode::Select,
            Error::Interrupted => ErrorCode::Interrupted,
            Error::BadChecksum { .. } => ErrorCode::BadChecksum,
            Error::UnknownChecksum(_) => ErrorCode::UnknownChecksum,
            Error::RepomdXml(_) => ErrorCode::RepomdXml,
            Error::MlBad(_) => ErrorCode::MlBad,
            Error::MlXml(_) => ErrorCode::MlXml,
            Error::BadGpg(_) => ErrorCode::BadGpg,
            Error::GpgNotSupported => ErrorCode::GpgNotSupported,
            Error::IncompleteRepo(_) => ErrorCode::IncompleteRepo,
            Error::Io(_) => ErrorCode::Io,
            Error::CannotCreateDir(_) => ErrorCode::CannotCreateDir,
            Error::CannotCreateTmp(_) => ErrorCode::CannotCreateTmp,
            Error::NotLocal(_) => ErrorCode::NotLocal,
            Error::XmlParser(_) => ErrorCode::XmlParser,
            Error::NoUrl => ErrorCode::NoUrl,
            Error::BadUrl(_) => ErrorCode::BadUrl,
            Error::AlreadyDownloaded(_) => ErrorCode::AlreadyDownloaded,
            Error::Unfinished => ErrorCode::Unfinished,
            Error::CbInterrupted => ErrorCode::CbInterrupted,
            Error::Other(_) => ErrorCode::UnknownError,
        }
    }

    /// Transport-class errors (spec §7) are recoverable by trying another
    /// mirror; content/local errors are not.
    #[must_use]
    pub fn is_mirror_recoverable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::Curl
                | ErrorCode::CurlM
                | ErrorCode::BadStatus
                | ErrorCode::TemporaryErr
                | ErrorCode::Select
                | ErrorCode::BadChecksum
        )
    }
}
