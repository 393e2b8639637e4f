//! Module identifier extraction from staged file names.
//!
//! Staged files carry the percent-encoded display name of the user's pick, so
//! a content path like `Download/weird.name.kpm` arrives as
//! `Download%2Fweird.name.kpm`. The identifier is the run of non-`/`
//! characters immediately before the final `.kpm`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;
use crate::models::MODULE_EXTENSION;

static MODULE_ID_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"([^/]*?)\.kpm$").ok());

/// Percent-decodes a form-encoded file name.
///
/// `+` decodes to a space. Returns `None` for a malformed `%` escape or a
/// result that is not valid UTF-8.
pub fn decode_file_name(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .map_or(false, |hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = file_name.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|s| s.into_owned())
}

/// Percent-encodes a display name for use as a staged file name.
pub fn encode_file_name(display_name: &str) -> String {
    urlencoding::encode(display_name).into_owned()
}

/// Extracts the module identifier from a staged file name.
///
/// Returns `None` when decoding fails or the `.kpm` suffix is absent. The
/// returned string may be empty; `validate_identifier` rejects that.
pub fn extract_identifier(file_name: &str) -> Option<String> {
    let decoded = match decode_file_name(file_name) {
        Some(decoded) => decoded,
        None => {
            log::warn!("[Identifier] Failed to percent-decode file name: {}", file_name);
            return None;
        }
    };

    let pattern = MODULE_ID_PATTERN.as_ref()?;
    pattern
        .captures(&decoded)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether the decoded file name carries the module extension.
pub fn has_module_extension(file_name: &str) -> bool {
    decode_file_name(file_name).map_or(false, |name| name.ends_with(MODULE_EXTENSION))
}

/// Rejects empty identifiers and identifiers with control characters or separators.
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::InvalidIdentifier(format!(
            "empty identifier '{}'",
            id
        )));
    }
    if id.chars().any(|c| c.is_control() || c == '/') {
        return Err(ValidationError::InvalidIdentifier(format!(
            "identifier contains control characters or separators: {:?}",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extracts_simple_identifier() {
        assert_eq!(extract_identifier("demo.kpm"), Some("demo".to_string()));
    }

    #[test]
    fn test_decodes_before_matching() {
        assert_eq!(
            extract_identifier("encoded%20mod.kpm"),
            Some("encoded mod".to_string())
        );
        assert_eq!(
            extract_identifier("plus+sign%2B.kpm"),
            Some("plus sign+".to_string())
        );
    }

    #[test]
    fn test_strips_directories_and_keeps_inner_dots() {
        assert_eq!(
            extract_identifier("a/b/weird.name.kpm"),
            Some("weird.name".to_string())
        );
        assert_eq!(
            extract_identifier("primary%3ADownload%2Fweird.name.kpm"),
            Some("weird.name".to_string())
        );
    }

    #[test]
    fn test_repeated_suffix_keeps_all_but_last() {
        assert_eq!(extract_identifier("x.kpm.kpm"), Some("x.kpm".to_string()));
    }

    #[test]
    fn test_missing_suffix_yields_nothing() {
        assert_eq!(extract_identifier("module.zip"), None);
        assert_eq!(extract_identifier("module.kpm.bak"), None);
        assert_eq!(extract_identifier("module.KPM"), None);
    }

    #[test]
    fn test_malformed_escape_yields_nothing() {
        assert_eq!(extract_identifier("bad%zzname.kpm"), None);
        assert_eq!(extract_identifier("trailing%2.kpm"), None);
        assert_eq!(extract_identifier("%ff%fe.kpm"), None);
    }

    #[test]
    fn test_bare_suffix_is_empty_and_invalid() {
        let id = extract_identifier(".kpm").expect("suffix present");
        assert_eq!(id, "");
        assert!(validate_identifier(&id).is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_control_chars() {
        assert!(validate_identifier("demo").is_ok());
        assert!(validate_identifier("encoded mod").is_ok());
        assert!(validate_identifier("bad\nid").is_err());
        assert!(validate_identifier("nul\0id").is_err());
    }

    #[test]
    fn test_encode_round_trips_through_decode() {
        let encoded = encode_file_name("Download/my module.kpm");
        assert!(!encoded.contains('/'));
        assert_eq!(
            decode_file_name(&encoded),
            Some("Download/my module.kpm".to_string())
        );
        assert!(has_module_extension(&encoded));
        assert!(!has_module_extension(&encode_file_name("readme.txt")));
    }

    proptest! {
        #[test]
        fn prop_identifier_is_text_before_final_suffix(stem in "[A-Za-z0-9_ .-]{0,24}") {
            let encoded = encode_file_name(&format!("{}.kpm", stem));
            prop_assert_eq!(extract_identifier(&encoded), Some(stem));
        }

        #[test]
        fn prop_names_without_suffix_yield_nothing(name in "[A-Za-z0-9_ -]{0,24}") {
            let encoded = encode_file_name(&name);
            prop_assert_eq!(extract_identifier(&encoded), None);
        }
    }
}
