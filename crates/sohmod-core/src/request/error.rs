//! Parser error type.

use std::fmt;

/// Logical field of an install invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    DownloadUrl,
    ModName,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::DownloadUrl => write!(f, "download URL"),
            Field::ModName => write!(f, "mod name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Input does not start with `<scheme>:`.
    #[error("unsupported scheme: expected `{expected}:`")]
    UnsupportedScheme { expected: String },
    #[error("missing {0}")]
    MissingField(Field),
    /// More separators than fields; the download URL most likely contains a `,`.
    #[error("ambiguous separator: found {fields} comma-separated fields, expected at most 3 (download URLs must not contain ',')")]
    AmbiguousSeparator { fields: usize },
    #[error("invalid download URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid mod name `{name}`: {reason}")]
    InvalidModName { name: String, reason: &'static str },
}
