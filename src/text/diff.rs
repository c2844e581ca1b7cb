//! Minimal-edit computation between the text on screen and a new hypothesis.
//!
//! Streaming recognizers revise their transcript as more audio arrives.
//! Rather than wiping and retyping on every revision (visible flicker, lost
//! cursor context), the reconciler converges the on-screen text with the
//! smallest possible edit: one batched backspace run followed by one insert.
//! This module computes that edit.

// ---------------------------------------------------------------------------
// EditPlan
// ---------------------------------------------------------------------------

/// The edit that transforms the on-screen text into the target text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPlan {
    /// Characters shared by both strings at the start.
    pub common_prefix_chars: usize,
    /// Backspaces to issue (characters beyond the common prefix currently
    /// on screen).
    pub backspaces: usize,
    /// Text to insert after the backspaces.
    pub insert: String,
}

impl EditPlan {
    /// `true` when no keystrokes are needed at all.
    pub fn is_noop(&self) -> bool {
        self.backspaces == 0 && self.insert.is_empty()
    }
}

// ---------------------------------------------------------------------------
// compute_edit
// ---------------------------------------------------------------------------

/// Compute the minimal backspace+insert edit from `on_screen` to `target`.
///
/// The common prefix is found character-by-character (`char`, not byte), so
/// multi-byte UTF-8 text slices correctly.  Backspace counts are character
/// counts, matching what key simulation consumes.
///
/// # Examples
///
/// ```
/// use dictate::text::compute_edit;
///
/// // The recognizer revised "wor" to "word": keep the prefix, fix the tail.
/// let plan = compute_edit("Hello wor", "Hello word");
/// assert_eq!(plan.backspaces, 0);
/// assert_eq!(plan.insert, "d");
///
/// let plan = compute_edit("Hello word", "Hello world");
/// assert_eq!(plan.backspaces, 1);
/// assert_eq!(plan.insert, "ld");
/// ```
pub fn compute_edit(on_screen: &str, target: &str) -> EditPlan {
    let mut prefix_chars = 0usize;
    let mut prefix_bytes = 0usize;

    for (a, b) in on_screen.chars().zip(target.chars()) {
        if a != b {
            break;
        }
        prefix_chars += 1;
        prefix_bytes += a.len_utf8();
    }

    EditPlan {
        common_prefix_chars: prefix_chars,
        backspaces: on_screen[prefix_bytes..].chars().count(),
        insert: target[prefix_bytes..].to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_need_no_edit() {
        let plan = compute_edit("hello", "hello");
        assert!(plan.is_noop());
        assert_eq!(plan.common_prefix_chars, 5);
    }

    #[test]
    fn pure_extension_appends_only() {
        let plan = compute_edit("Hel", "Hello");
        assert_eq!(plan.backspaces, 0);
        assert_eq!(plan.insert, "lo");
    }

    #[test]
    fn single_char_revision() {
        // The scenario that motivates minimal edits: a one-letter fix near
        // the end of a long hypothesis.
        let plan = compute_edit("Hello wor", "Hello word");
        assert_eq!(plan.common_prefix_chars, 9);
        assert_eq!(plan.backspaces, 0);
        assert_eq!(plan.insert, "d");
    }

    #[test]
    fn mid_word_revision_deletes_then_inserts() {
        let plan = compute_edit("Hello word", "Hello world");
        assert_eq!(plan.backspaces, 1);
        assert_eq!(plan.insert, "ld");
    }

    #[test]
    fn full_replacement() {
        let plan = compute_edit("alpha", "beta");
        assert_eq!(plan.common_prefix_chars, 0);
        assert_eq!(plan.backspaces, 5);
        assert_eq!(plan.insert, "beta");
    }

    #[test]
    fn shrinking_hypothesis_only_deletes() {
        let plan = compute_edit("Hello world", "Hello");
        assert_eq!(plan.backspaces, 6);
        assert_eq!(plan.insert, "");
    }

    #[test]
    fn empty_on_screen_inserts_everything() {
        let plan = compute_edit("", "Hello");
        assert_eq!(plan.backspaces, 0);
        assert_eq!(plan.insert, "Hello");
    }

    #[test]
    fn empty_target_deletes_everything() {
        let plan = compute_edit("Hello", "");
        assert_eq!(plan.backspaces, 5);
        assert_eq!(plan.insert, "");
    }

    #[test]
    fn multibyte_prefix_slices_on_char_boundary() {
        let plan = compute_edit("café au lait", "café crème");
        assert_eq!(plan.common_prefix_chars, 5); // "café "
        assert_eq!(plan.backspaces, 7); // "au lait"
        assert_eq!(plan.insert, "crème");
    }

    #[test]
    fn multibyte_revision_counts_chars_not_bytes() {
        let plan = compute_edit("สวัสดี", "สวัสดีครับ");
        assert_eq!(plan.backspaces, 0);
        assert_eq!(plan.insert, "ครับ");
    }

    #[test]
    fn backspaces_never_exceed_on_screen_length() {
        for (old, new) in [
            ("Hello world", "Goodbye"),
            ("abc", ""),
            ("", "xyz"),
            ("same", "same"),
        ] {
            let plan = compute_edit(old, new);
            assert!(plan.backspaces <= old.chars().count());
        }
    }
}
