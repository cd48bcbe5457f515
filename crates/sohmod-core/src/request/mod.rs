//! Install requests and the custom-scheme invocation parser.
//!
//! An invocation looks like `shipofharkinian:<downloadURL>,<modName>,<modID>`.
//! The payload has no escaping, so a download URL containing a literal `,`
//! cannot be told apart from the field separator; such inputs are rejected
//! with [`ParseError::AmbiguousSeparator`] instead of being truncated.

mod error;
mod mod_name;
mod parse;

pub use error::{Field, ParseError};
pub use mod_name::validate_mod_name;
pub use parse::{parse, parse_with_scheme};

use serde::Serialize;

/// Scheme registered with the OS for install links.
pub const DEFAULT_SCHEME: &str = "shipofharkinian";

/// A validated request to install one mod. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallRequest {
    source_url: String,
    mod_name: String,
    mod_id: Option<String>,
}

impl InstallRequest {
    /// Build a request from already-separated fields (CLI flags, relayed args).
    /// Applies the same URL and mod-name checks as [`parse`].
    pub fn from_parts(
        source_url: &str,
        mod_name: &str,
        mod_id: Option<&str>,
    ) -> Result<Self, ParseError> {
        let source_url = source_url.trim();
        let mod_name = mod_name.trim();
        if source_url.is_empty() {
            return Err(ParseError::MissingField(Field::DownloadUrl));
        }
        if mod_name.is_empty() {
            return Err(ParseError::MissingField(Field::ModName));
        }
        parse::check_download_url(source_url)?;
        validate_mod_name(mod_name)?;
        let mod_id = mod_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        Ok(Self {
            source_url: source_url.to_string(),
            mod_name: mod_name.to_string(),
            mod_id,
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Filesystem-safe directory name under the mods root.
    pub fn mod_name(&self) -> &str {
        &self.mod_name
    }

    pub fn mod_id(&self) -> Option<&str> {
        self.mod_id.as_deref()
    }
}
