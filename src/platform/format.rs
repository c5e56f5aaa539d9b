//! Platform text formatting abstraction.

/// Markup formatter for a platform's dialect. The default implementations
/// cover common Markdown; adapters override what differs.
pub trait Formatter: Send + Sync {
    fn bold(&self, text: &str) -> String {
        format!("**{text}**")
    }

    fn italic(&self, text: &str) -> String {
        format!("_{text}_")
    }

    fn code(&self, text: &str) -> String {
        format!("`{text}`")
    }

    fn code_block(&self, text: &str, lang: Option<&str>) -> String {
        format!("```{}\n{text}\n```", lang.unwrap_or(""))
    }

    fn link(&self, label: &str, url: &str) -> String {
        format!("[{label}]({url})")
    }

    fn strikethrough(&self, text: &str) -> String {
        format!("~~{text}~~")
    }

    fn user_mention(&self, username: &str) -> String {
        format!("@{username}")
    }

    fn horizontal_rule(&self) -> String {
        "---".to_string()
    }

    fn list_item(&self, text: &str) -> String {
        format!("- {text}")
    }

    fn numbered_list_item(&self, index: usize, text: &str) -> String {
        format!("{index}. {text}")
    }

    fn heading(&self, level: u8, text: &str) -> String {
        let level = level.clamp(1, 6) as usize;
        format!("{} {text}", "#".repeat(level))
    }

    fn escape_text(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            if matches!(ch, '*' | '_' | '`' | '~' | '[' | ']' | '#' | '|') {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }

    fn table(&self, headers: &[&str], rows: &[Vec<String>]) -> String {
        let mut out = String::new();
        out.push_str(&format!("| {} |\n", headers.join(" | ")));
        out.push_str(&format!(
            "|{}\n",
            headers.iter().map(|_| "---|").collect::<String>()
        ));
        for row in rows {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        out
    }

    fn key_value_list(&self, pairs: &[(&str, String)]) -> String {
        pairs
            .iter()
            .map(|(key, value)| format!("- {}: {value}", self.bold(key)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Plain Markdown formatter used by tests and Markdown-native platforms.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {}

#[cfg(test)]
mod tests {
    use super::{Formatter, MarkdownFormatter};

    #[test]
    fn escape_covers_markup_characters() {
        let fmt = MarkdownFormatter;
        assert_eq!(fmt.escape_text("a*b_c"), "a\\*b\\_c");
    }

    #[test]
    fn table_renders_header_separator() {
        let fmt = MarkdownFormatter;
        let rendered = fmt.table(&["a", "b"], &[vec!["1".into(), "2".into()]]);
        assert!(rendered.contains("| a | b |"));
        assert!(rendered.contains("|---|---|"));
        assert!(rendered.contains("| 1 | 2 |"));
    }
}
