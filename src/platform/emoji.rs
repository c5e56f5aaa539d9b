//! Emoji normalization at the adapter boundary.
//!
//! Platforms report reactions as shortcodes ("one", "+1") or raw glyphs
//! ("1️⃣", "👍"). Core code only ever sees the semantic [`EmojiKind`].

/// Semantic emoji categories used as the reaction control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmojiKind {
    /// A number emoji, 1-based (`one` → `Number(1)`).
    Number(usize),
    /// Approval (`+1`).
    Approve,
    /// Denial (`-1`).
    Deny,
    /// Approve and invite the sender (message approval only).
    AllowAll,
    /// Toggle the minimized view of a task list or subagent post.
    Minimize,
    /// Cancel the session (session-start post).
    Cancel,
    /// Interrupt the current turn (session-start post).
    Escape,
    /// Resume a paused session (lifecycle post).
    Resume,
    /// Skip (`x` on a worktree prompt).
    Skip,
    /// Start a bug report from a failing post.
    BugReport,
    /// Anything the core does not assign meaning to.
    Other,
}

/// Shortcode the bot uses when seeding a reaction of the given kind.
pub fn shortcode(kind: EmojiKind) -> &'static str {
    match kind {
        EmojiKind::Number(1) => "one",
        EmojiKind::Number(2) => "two",
        EmojiKind::Number(3) => "three",
        EmojiKind::Number(4) => "four",
        EmojiKind::Number(5) => "five",
        EmojiKind::Number(6) => "six",
        EmojiKind::Number(7) => "seven",
        EmojiKind::Number(8) => "eight",
        EmojiKind::Number(_) => "nine",
        EmojiKind::Approve => "+1",
        EmojiKind::Deny => "-1",
        EmojiKind::AllowAll => "white_check_mark",
        EmojiKind::Minimize => "heavy_minus_sign",
        EmojiKind::Cancel => "octagonal_sign",
        EmojiKind::Escape => "leftwards_arrow_with_hook",
        EmojiKind::Resume => "arrow_forward",
        EmojiKind::Skip => "x",
        EmojiKind::BugReport => "bug",
        EmojiKind::Other => "grey_question",
    }
}

/// Number emojis seeded on a post offering `count` choices (capped at 9).
pub fn number_shortcodes(count: usize) -> Vec<String> {
    (1..=count.min(9))
        .map(|n| shortcode(EmojiKind::Number(n)).to_string())
        .collect()
}

/// Normalize a raw reaction name or glyph into its semantic kind.
pub fn normalize(raw: &str) -> EmojiKind {
    let name = canonical_name(raw);
    match name.as_str() {
        "one" | "1" => EmojiKind::Number(1),
        "two" | "2" => EmojiKind::Number(2),
        "three" | "3" => EmojiKind::Number(3),
        "four" | "4" => EmojiKind::Number(4),
        "five" | "5" => EmojiKind::Number(5),
        "six" | "6" => EmojiKind::Number(6),
        "seven" | "7" => EmojiKind::Number(7),
        "eight" | "8" => EmojiKind::Number(8),
        "nine" | "9" => EmojiKind::Number(9),
        "+1" | "thumbsup" | "thumbs_up" => EmojiKind::Approve,
        "-1" | "thumbsdown" | "thumbs_down" => EmojiKind::Deny,
        "white_check_mark" | "heavy_check_mark" | "ballot_box_with_check" => EmojiKind::AllowAll,
        "heavy_minus_sign" | "minus" => EmojiKind::Minimize,
        "octagonal_sign" | "stop_sign" | "no_entry_sign" | "no_entry" => EmojiKind::Cancel,
        "leftwards_arrow_with_hook" | "arrow_right_hook" => EmojiKind::Escape,
        "arrow_forward" | "play_button" => EmojiKind::Resume,
        "x" | "cross_mark" | "negative_squared_cross_mark" => EmojiKind::Skip,
        "bug" | "lady_beetle" | "beetle" => EmojiKind::BugReport,
        _ => EmojiKind::Other,
    }
}

/// Resolve a raw reaction to a canonical shortcode: strip colons, map
/// unicode glyphs through the emoji db, then strip skin-tone suffixes.
fn canonical_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(':');

    // Keycap sequences ("1️⃣") are not in every emoji db; handle directly.
    if let Some(digit) = trimmed.strip_suffix("\u{fe0f}\u{20e3}") {
        return digit.to_string();
    }
    if let Some(digit) = trimmed.strip_suffix('\u{20e3}') {
        return digit.to_string();
    }

    if let Some(found) = emojis::get(trimmed) {
        if let Some(code) = found.shortcode() {
            return code.to_string();
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    match lower.split_once("::skin-tone-") {
        Some((base, _)) => base.to_string(),
        None => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::{EmojiKind, normalize, number_shortcodes};

    #[test]
    fn shortcodes_normalize() {
        assert_eq!(normalize("one"), EmojiKind::Number(1));
        assert_eq!(normalize(":two:"), EmojiKind::Number(2));
        assert_eq!(normalize("+1"), EmojiKind::Approve);
        assert_eq!(normalize("thumbsup"), EmojiKind::Approve);
        assert_eq!(normalize("-1"), EmojiKind::Deny);
        assert_eq!(normalize("x"), EmojiKind::Skip);
        assert_eq!(normalize("party_parrot"), EmojiKind::Other);
    }

    #[test]
    fn unicode_glyphs_normalize() {
        assert_eq!(normalize("1️⃣"), EmojiKind::Number(1));
        assert_eq!(normalize("4️⃣"), EmojiKind::Number(4));
        assert_eq!(normalize("👍"), EmojiKind::Approve);
        assert_eq!(normalize("👎"), EmojiKind::Deny);
        assert_eq!(normalize("❌"), EmojiKind::Skip);
        assert_eq!(normalize("🐛"), EmojiKind::BugReport);
    }

    #[test]
    fn skin_tones_are_stripped() {
        assert_eq!(normalize("thumbsup::skin-tone-3"), EmojiKind::Approve);
    }

    #[test]
    fn number_seed_list_is_capped() {
        assert_eq!(number_shortcodes(2), vec!["one", "two"]);
        assert_eq!(number_shortcodes(12).len(), 9);
    }
}
