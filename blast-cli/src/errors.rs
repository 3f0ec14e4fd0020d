//! Error chain printing
//!
//! Wrapped errors repeat their causes in their own messages. The printer
//! walks the chain from outermost to innermost, drops links whose text is
//! already contained in the previous line, and indents one level per
//! remaining link.

use anyhow::Error;

pub fn format_error_chain(error: &Error) -> String {
    let mut lines: Vec<String> = Vec::new();
    for cause in error.chain() {
        let message = cause.to_string();
        // Skip links the previous message already spells out.
        if lines.last().is_some_and(|prev| prev.contains(&message)) {
            continue;
        }
        lines.push(message);
    }

    lines
        .iter()
        .enumerate()
        .map(|(depth, message)| format!("{}{message}", "  ".repeat(depth)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_chain_is_indented_per_level() {
        let error = anyhow!("disk on fire")
            .context("reading task file")
            .context("building pipeline");
        let formatted = format_error_chain(&error);
        assert_eq!(
            formatted,
            "building pipeline\n  reading task file\n    disk on fire"
        );
    }

    #[test]
    fn test_duplicated_causes_are_collapsed() {
        // thiserror-style wrapping repeats the source in the message.
        let inner = anyhow!("Path does not exist: /p/pipeline.yml");
        let error = inner.context("Build error: Path does not exist: /p/pipeline.yml");
        let formatted = format_error_chain(&error);
        assert_eq!(formatted, "Build error: Path does not exist: /p/pipeline.yml");
    }

    #[test]
    fn test_single_error() {
        let error = anyhow!("just one thing");
        assert_eq!(format_error_chain(&error), "just one thing");
    }
}
