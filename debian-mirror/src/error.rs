// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebianError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("date parsing error: {0:?}")]
    DateParse(#[from] mailparse::MailParseError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("required field missing in control paragraph: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("expected 1 paragraph in control file; got {0}")]
    ReleaseControlParagraphMismatch(usize),

    #[error("digest missing from index entry")]
    ReleaseMissingDigest,

    #[error("size missing from index entry")]
    ReleaseMissingSize,

    #[error("path missing from index entry")]
    ReleaseMissingPath,

    #[error("index entry path unexpectedly has spaces: {0}")]
    ReleasePathWithSpaces(String),

    #[error("failed to parse dependency expression: {0}")]
    DependencyParse(String),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),

    #[error("version string is empty")]
    VersionEmpty,

    #[error("invalid sources.list entry: {0}")]
    SourcesListEntry(String),

    #[error("unsupported repository URL: {0}")]
    RepositoryUrlUnsupported(String),

    #[error("repository I/O error on path {0}: {1:?}")]
    RepositoryIoPath(String, std::io::Error),

    #[error("package index not found in any compression format: {0}")]
    RepositoryIndexNotFound(String),

    #[error("no configured repository has URL {0}")]
    RepositoryNotConfigured(String),

    #[error("package not found: {0} {1}")]
    PackageNotFound(String, String),

    #[error("path escapes the mirror root: {0}")]
    UnsafePath(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebianError>;

impl DebianError {
    /// Whether this error represents a resource that does not exist.
    ///
    /// This is distinct from malformed data, which is reported through variants like
    /// [Self::ControlRequiredFieldMissing].
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::RepositoryIoPath(_, e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::RepositoryIndexNotFound(_) | Self::PackageNotFound(_, _) => true,
            _ => false,
        }
    }
}
