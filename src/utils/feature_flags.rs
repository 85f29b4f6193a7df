pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Trimmed, non-empty value or `None`.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_accepts_common_spellings() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" Yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn non_empty_drops_blank_values() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" abc ".to_string())), Some("abc".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
