// Output formatting — terminal summaries for the CLI.

pub mod terminal;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Respects UTF-8 character boundaries, so accented site names or
/// non-ASCII paths never panic.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_chars("13/A1/IMG.JPG", 40), "13/A1/IMG.JPG");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_chars("Área_Peñón", 4), "Área...");
    }
}
