//! `scheme:<downloadURL>,<modName>[,<modID>]` grammar.
//!
//! The format has no escape for `,`, so a URL must carry its commas
//! percent-encoded as `%2C` (equivalent for HTTP servers; the URL is passed
//! on verbatim, never decoded). A raw comma is caught when it yields a fourth
//! field, or when the spill-over lands a `/` in the mod name. One case cannot
//! be told apart: a URL with a single comma and no mod ID, e.g.
//! `https://host/a,b.zip,CoolMod`, reads as URL `https://host/a`, name
//! `b.zip`, ID `CoolMod`. Launchers that cannot guarantee encoding should use
//! the structured form (`InstallRequest::from_parts`).

use url::Url;

use super::error::{Field, ParseError};
use super::mod_name::validate_mod_name;
use super::{InstallRequest, DEFAULT_SCHEME};

/// Parses an invocation for the default `shipofharkinian` scheme.
///
/// # Examples
///
/// `shipofharkinian:https://example.com/file.zip,CoolMod,12345` →
/// `{ source_url: "https://example.com/file.zip", mod_name: "CoolMod", mod_id: Some("12345") }`
pub fn parse(raw: &str) -> Result<InstallRequest, ParseError> {
    parse_with_scheme(raw, DEFAULT_SCHEME)
}

/// Parses an invocation for `scheme`. Pure: no I/O, no logging.
///
/// The scheme is matched case-insensitively and split off at the first `:`;
/// the remaining payload is split on every `,`. The download URL may contain
/// `:` and `/`, but a `,` inside it produces more than three fields and is
/// rejected as [`ParseError::AmbiguousSeparator`].
pub fn parse_with_scheme(raw: &str, scheme: &str) -> Result<InstallRequest, ParseError> {
    let unsupported = || ParseError::UnsupportedScheme {
        expected: scheme.to_string(),
    };
    let raw = raw.trim();
    let (prefix, payload) = raw.split_once(':').ok_or_else(unsupported)?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return Err(unsupported());
    }
    // Some launchers hand over `scheme://...`; the payload itself never starts with `//`.
    let payload = payload.strip_prefix("//").unwrap_or(payload);

    let fields: Vec<&str> = payload.split(',').map(str::trim).collect();
    if fields.len() > 3 {
        return Err(ParseError::AmbiguousSeparator {
            fields: fields.len(),
        });
    }

    let url = fields.first().copied().unwrap_or_default();
    let name = fields.get(1).copied().unwrap_or_default();
    let id = fields.get(2).copied().filter(|s| !s.is_empty());

    if url.is_empty() {
        return Err(ParseError::MissingField(Field::DownloadUrl));
    }
    if name.is_empty() {
        return Err(ParseError::MissingField(Field::ModName));
    }
    check_download_url(url)?;
    validate_mod_name(name)?;

    Ok(InstallRequest {
        source_url: url.to_string(),
        mod_name: name.to_string(),
        mod_id: id.map(String::from),
    })
}

/// Download URLs must be absolute http(s) URLs with a host.
pub(super) fn check_download_url(url: &str) -> Result<(), ParseError> {
    let invalid = |reason: String| ParseError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}
