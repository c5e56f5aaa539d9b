//! Content breaking for platform size limits.
//!
//! Splits a growing text buffer into platform-shaped fragments at natural
//! boundaries. Thresholds are inclusive: text exactly at the limit is left
//! whole, one character past it is split.

use crate::platform::MessageLimits;

/// Result of one break: the fragment to post and the remaining text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broken {
    pub first: String,
    pub remainder: String,
}

/// Split `text` once if it exceeds the streaming hard threshold.
///
/// Boundary preference, searched inside `[soft_threshold, hard_threshold]`:
/// blank line, newline, sentence-ending punctuation, whitespace, then a
/// hard cut at the threshold. Never splits inside a fenced code block when
/// a safe boundary exists in the window; a forced in-fence cut closes and
/// reopens the fence. Idempotent over already-broken input.
pub fn break_chunk(text: &str, limits: &MessageLimits) -> Broken {
    break_at(text, limits.hard_threshold, limits.soft_threshold())
}

/// Split `text` once against an explicit inclusive `limit`, preferring
/// boundaries at or past `window_floor`.
pub fn break_at(text: &str, limit: usize, window_floor: usize) -> Broken {
    if text.len() <= limit {
        return Broken {
            first: text.to_string(),
            remainder: String::new(),
        };
    }

    let window_end = floor_char_boundary(text, limit);
    let window_start = floor_char_boundary(text, window_floor.min(window_end));
    let window = &text[..window_end];

    let cut = find_boundary(window, window_start).unwrap_or(window_end);

    // Don't split inside a fenced code block when a boundary before the
    // fence still lands in the window.
    if let Some(fence_open) = open_fence_start(text, cut) {
        if fence_open >= window_start {
            let first = text[..fence_open].trim_end().to_string();
            if !first.is_empty() {
                return Broken {
                    first,
                    remainder: text[fence_open..].to_string(),
                };
            }
        }
        return split_inside_fence(text, cut, fence_open);
    }

    Broken {
        first: text[..cut].trim_end().to_string(),
        remainder: text[cut..].trim_start_matches('\n').to_string(),
    }
}

/// Split into a full chunk sequence; every element but possibly the last
/// fits within the hard threshold.
pub fn break_all(text: &str, limits: &MessageLimits) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text.to_string();
    while rest.len() > limits.hard_threshold {
        let broken = break_chunk(&rest, limits);
        if broken.remainder.is_empty() || broken.first.is_empty() {
            break;
        }
        chunks.push(broken.first);
        rest = broken.remainder;
    }
    chunks.push(rest);
    chunks
}

/// Best cut position in `window` at or past `floor`, by boundary quality.
fn find_boundary(window: &str, floor: usize) -> Option<usize> {
    if let Some(idx) = window.rfind("\n\n").filter(|&idx| idx >= floor) {
        return Some(idx);
    }
    if let Some(idx) = window.rfind('\n').filter(|&idx| idx >= floor) {
        return Some(idx);
    }
    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|pat| window.rfind(pat))
        .max()
        .filter(|&idx| idx >= floor);
    if let Some(idx) = sentence {
        return Some(idx + 1);
    }
    window
        .rfind(|c: char| c.is_whitespace())
        .filter(|&idx| idx >= floor)
}

/// If `cut` lies inside an open code fence, the byte offset where that
/// fence's opening line starts.
fn open_fence_start(text: &str, cut: usize) -> Option<usize> {
    let mut open: Option<usize> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if offset >= cut {
            break;
        }
        if line.trim_start().starts_with("```") {
            open = match open {
                Some(_) => None,
                None => Some(offset),
            };
        }
        offset += line.len();
    }
    open
}

/// Forced cut inside a fence: close it in the first fragment and reopen
/// it (with its info string) in the remainder.
fn split_inside_fence(text: &str, cut: usize, fence_open: usize) -> Broken {
    let info = text[fence_open..]
        .lines()
        .next()
        .map(|line| line.trim_start().trim_start_matches('`').trim().to_string())
        .unwrap_or_default();

    let mut first = text[..cut].trim_end().to_string();
    first.push_str("\n```");

    let mut remainder = format!("```{info}\n");
    remainder.push_str(text[cut..].trim_start_matches('\n'));

    Broken { first, remainder }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::{break_all, break_at, break_chunk};
    use crate::platform::MessageLimits;

    fn limits() -> MessageLimits {
        MessageLimits {
            max_length: 16_000,
            hard_threshold: 12_000,
        }
    }

    #[test]
    fn at_the_limit_stays_whole() {
        let text = "a".repeat(12_000);
        let broken = break_chunk(&text, &limits());
        assert_eq!(broken.first, text);
        assert!(broken.remainder.is_empty());
    }

    #[test]
    fn one_past_the_limit_splits() {
        let text = "a".repeat(12_001);
        let broken = break_chunk(&text, &limits());
        assert!(!broken.remainder.is_empty());
        assert!(broken.first.len() <= 12_000);
    }

    #[test]
    fn prefers_a_paragraph_boundary() {
        let mut text = "x".repeat(11_000);
        text.push_str("\n\n");
        text.push_str(&"y".repeat(3_998));
        let broken = break_chunk(&text, &limits());
        assert_eq!(broken.first.len(), 11_000);
        assert!(broken.remainder.starts_with('y'));
    }

    #[test]
    fn falls_back_to_sentence_punctuation() {
        let mut text = "word ".repeat(2_000); // 10,000 chars, spaces only
        text.truncate(9_998);
        text.push_str(". ");
        text.push_str(&"z".repeat(4_000));
        let broken = break_chunk(&text, &limits());
        assert!(broken.first.ends_with('.'));
    }

    #[test]
    fn avoids_splitting_an_open_fence_when_a_boundary_precedes_it() {
        let mut text = "intro\n".repeat(1_600); // 9,600 chars of prose
        text.push_str("```rust\n");
        text.push_str(&"let x = 1;\n".repeat(500));
        let broken = break_chunk(&text, &limits());
        assert!(!broken.first.contains("```"));
        assert!(broken.remainder.starts_with("```rust"));
    }

    #[test]
    fn forced_fence_cut_closes_and_reopens() {
        let mut text = String::from("```rust\n");
        text.push_str(&"let value = compute();\n".repeat(800));
        let broken = break_chunk(&text, &limits());
        assert!(broken.first.ends_with("```"));
        assert!(broken.remainder.starts_with("```rust\n"));
    }

    #[test]
    fn break_all_covers_everything_in_order() {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("paragraph {i} {}\n\n", "lorem ".repeat(150)));
        }
        let chunks = break_all(&text, &limits());
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 12_000);
        }
        assert!(chunks.concat().contains("paragraph 39"));
    }

    #[test]
    fn explicit_limit_boundary_is_inclusive() {
        let text = "b".repeat(16_000);
        let broken = break_at(&text, 16_000, 9_000);
        assert!(broken.remainder.is_empty());
    }
}
