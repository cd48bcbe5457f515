//! Mod-name validation.
//!
//! Names become a single directory under the mods root, so they are checked
//! rather than rewritten: a request that names `../x` is an error, not `_x`.

use super::error::ParseError;

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

/// Characters Windows refuses in file names.
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Checks that `name` is a non-empty single path component that is safe on
/// Linux, macOS and Windows.
///
/// Leading dots are refused so a mod can never shadow the `.tmp` and
/// `.staging` work areas.
pub fn validate_mod_name(name: &str) -> Result<(), ParseError> {
    let fail = |reason: &'static str| {
        Err(ParseError::InvalidModName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return fail("empty");
    }
    if name.len() > NAME_MAX {
        return fail("longer than 255 bytes");
    }
    if name == "." || name == ".." || name.contains("..") {
        return fail("traversal sequence");
    }
    if name.contains('/') || name.contains('\\') {
        return fail("path separator");
    }
    if name.chars().any(|c| c == '\0' || c.is_control()) {
        return fail("control character");
    }
    if name.chars().any(|c| RESERVED_CHARS.contains(&c)) {
        return fail("reserved character");
    }
    if name.starts_with('.') {
        return fail("leading dot");
    }
    if name.ends_with('.') || name.ends_with(' ') || name.starts_with(' ') {
        return fail("leading or trailing space or dot");
    }
    let stem = name.split('.').next().unwrap_or(name);
    if RESERVED_DEVICE_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(stem))
    {
        return fail("reserved device name");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(name: &str) -> &'static str {
        match validate_mod_name(name) {
            Err(ParseError::InvalidModName { reason, .. }) => reason,
            other => panic!("expected InvalidModName for {name:?}, got {other:?}"),
        }
    }

    #[test]
    fn accepts_ordinary_names() {
        for name in ["CoolMod", "Cool Mod v2", "mod-1_final", "Ocarina.HD", "ゼルダ"] {
            assert!(validate_mod_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert_eq!(reason(".."), "traversal sequence");
        assert_eq!(reason("a..b"), "traversal sequence");
        assert_eq!(reason("a/b"), "path separator");
        assert_eq!(reason("a\\b"), "path separator");
    }

    #[test]
    fn rejects_hidden_and_reserved() {
        assert_eq!(reason(".staging"), "leading dot");
        assert_eq!(reason("con"), "reserved device name");
        assert_eq!(reason("NUL.txt"), "reserved device name");
        assert_eq!(reason("a:b"), "reserved character");
        assert_eq!(reason("trailing."), "leading or trailing space or dot");
        assert_eq!(reason("tab\there"), "control character");
    }

    #[test]
    fn rejects_overlong() {
        assert_eq!(reason(&"x".repeat(256)), "longer than 255 bytes");
        assert!(validate_mod_name(&"x".repeat(255)).is_ok());
    }
}
