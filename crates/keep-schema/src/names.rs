//! Identifier rules for entity kinds, attributes, and relationships.
//!
//! Identifiers become SQL table and column names inside the backing file, so
//! they are restricted to a conservative ASCII subset:
//! - Must be non-empty and at most [`MAX_IDENTIFIER_LEN`] bytes
//! - First character is an ASCII letter or `_`
//! - Remaining characters are ASCII letters, digits, or `_`
//! - Must not start with the reserved [`RESERVED_PREFIX`]

/// Prefix reserved for the store's own bookkeeping tables.
pub const RESERVED_PREFIX: &str = "keep_";

/// Longest accepted identifier.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Validate an identifier, returning the reason it was rejected.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("identifier must not be empty".into());
    };
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "identifier {name:?} is longer than {MAX_IDENTIFIER_LEN} bytes"
        ));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(format!(
            "identifier {name:?} must start with a letter or '_'"
        ));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!(
            "identifier {name:?} contains forbidden character {bad:?}"
        ));
    }
    if name.to_ascii_lowercase().starts_with(RESERVED_PREFIX) {
        return Err(format!(
            "identifier {name:?} uses the reserved prefix {RESERVED_PREFIX:?}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["Person", "first_name", "_hidden", "a1", "X"] {
            assert!(validate_identifier(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn rejects_leading_digit() {
        assert!(validate_identifier("1st").is_err());
    }

    #[test]
    fn rejects_punctuation_and_whitespace() {
        for name in ["first name", "a-b", "a.b", "quo\"te", "semi;colon"] {
            assert!(validate_identifier(name).is_err(), "{name}");
        }
    }

    #[test]
    fn rejects_reserved_prefix_case_insensitively() {
        assert!(validate_identifier("keep_links").is_err());
        assert!(validate_identifier("KEEP_meta").is_err());
        assert!(validate_identifier("keeper").is_ok());
    }

    #[test]
    fn rejects_overlong() {
        let name = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(validate_identifier(&name).is_err());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }
}
