//! Reference token resolution.
//!
//! Turns a caller-supplied ref (from the session's latest snapshot) or a raw
//! selector into a selector the engine can use. This is a pure table lookup:
//! a resolved selector may still fail to match at action time, which is a
//! separate failure (action timeout), not a resolution failure.

use std::collections::BTreeMap;

use surfkit_core::{Error, RefEntry, Result};

/// Resolve a ref token and/or raw selector against the session's reference
/// table. A known token wins; otherwise a raw selector is used verbatim;
/// otherwise resolution fails.
pub fn resolve(
    ref_token: Option<&str>,
    selector: Option<&str>,
    table: Option<&BTreeMap<String, RefEntry>>,
) -> Result<String> {
    if let Some(token) = ref_token {
        // Refs are accepted with or without the leading sigil.
        let token = token.trim_start_matches('@');
        if let Some(entry) = table.and_then(|t| t.get(token)) {
            return Ok(entry.selector.clone());
        }
        if selector.is_none() {
            return Err(Error::Resolution(format!(
                "ref '{}' not found; take a snapshot first or pass a selector",
                token
            )));
        }
    }

    selector
        .map(String::from)
        .ok_or_else(|| Error::Resolution("an element ref or a selector is required".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BTreeMap<String, RefEntry> {
        BTreeMap::from([(
            "e2".to_string(),
            RefEntry {
                role: "button".into(),
                name: "OK".into(),
                selector: "[role=\"button\"][name=\"OK\"]".into(),
            },
        )])
    }

    #[test]
    fn test_known_ref_uses_stored_selector() {
        let t = table();
        let got = resolve(Some("e2"), None, Some(&t)).unwrap();
        assert_eq!(got, "[role=\"button\"][name=\"OK\"]");
    }

    #[test]
    fn test_sigil_is_stripped() {
        let t = table();
        assert!(resolve(Some("@e2"), None, Some(&t)).is_ok());
    }

    #[test]
    fn test_unknown_ref_falls_back_to_selector() {
        let t = table();
        let got = resolve(Some("e9"), Some("#login"), Some(&t)).unwrap();
        assert_eq!(got, "#login");
    }

    #[test]
    fn test_unknown_ref_without_selector_fails() {
        let t = table();
        let err = resolve(Some("e9"), None, Some(&t)).unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[test]
    fn test_missing_table_fails_for_ref_only() {
        let err = resolve(Some("e1"), None, None).unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[test]
    fn test_selector_alone_is_used_verbatim() {
        let got = resolve(None, Some("input[type=search]"), None).unwrap();
        assert_eq!(got, "input[type=search]");
    }

    #[test]
    fn test_neither_fails() {
        assert!(matches!(
            resolve(None, None, None),
            Err(Error::Resolution(_))
        ));
    }
}
