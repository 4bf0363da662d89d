use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the prestarter.
/// Every module returns `Result<T, PrestarterError>`.
#[derive(Debug, Error)]
pub enum PrestarterError {
    // ── Platform ────────────────────────────────────────
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    // ── Catalog ─────────────────────────────────────────
    #[error("No {kind} build matches '{constraint}' for {platform}")]
    NoMatchingBuild {
        kind: String,
        constraint: String,
        platform: String,
    },

    #[error("Invalid version constraint '{0}'")]
    InvalidConstraint(String),

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to unpack {archive:?}: {reason}")]
    Unpack { archive: PathBuf, reason: String },

    #[error("Base runtime missing at {0:?}")]
    MissingBaseRuntime(PathBuf),

    // ── Policy ──────────────────────────────────────────
    #[error("Download declined by user")]
    UserDeclined,

    #[error("Acquisition cancelled")]
    Cancelled,

    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Insufficient disk space at {path:?}: available={available} required={required}")]
    InsufficientDiskSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    // ── Formats ─────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::DeError),

    // ── Config ──────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type PrestarterResult<T> = Result<T, PrestarterError>;

/// Coarse classification that drives retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedPlatform,
    NoMatchingBuild,
    Network,
    Integrity,
    Unpack,
    UserDeclined,
    Cancelled,
    Fatal,
}

impl PrestarterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrestarterError::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatform,
            PrestarterError::NoMatchingBuild { .. } => ErrorKind::NoMatchingBuild,
            PrestarterError::Http(_) | PrestarterError::DownloadFailed { .. } => ErrorKind::Network,
            PrestarterError::ChecksumMismatch { .. } => ErrorKind::Integrity,
            PrestarterError::Zip(_) | PrestarterError::Unpack { .. } => ErrorKind::Unpack,
            PrestarterError::UserDeclined => ErrorKind::UserDeclined,
            PrestarterError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Unpack)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrestarterError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for PrestarterError {
    fn from(source: std::io::Error) -> Self {
        PrestarterError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for presentation layers ──────────────
// The dialog layer renders errors as plain messages.
impl serde::Serialize for PrestarterError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        let net = PrestarterError::DownloadFailed {
            url: "https://example.com".into(),
            status: 503,
        };
        assert_eq!(net.kind(), ErrorKind::Network);
        assert!(net.is_transient());

        let unpack = PrestarterError::Unpack {
            archive: PathBuf::from("a.zip"),
            reason: "truncated".into(),
        };
        assert!(unpack.is_transient());
    }

    #[test]
    fn fatal_kinds_are_not_transient() {
        let mismatch = PrestarterError::ChecksumMismatch {
            path: PathBuf::from("a.zip"),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(mismatch.kind(), ErrorKind::Integrity);
        assert!(!mismatch.is_transient());
        assert!(!PrestarterError::UserDeclined.is_transient());
        assert!(!PrestarterError::Cancelled.is_transient());
        assert_eq!(
            PrestarterError::MissingBaseRuntime(PathBuf::from("java")).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn serializes_as_message() {
        let json = serde_json::to_string(&PrestarterError::UserDeclined).unwrap();
        assert_eq!(json, "\"Download declined by user\"");
    }
}
