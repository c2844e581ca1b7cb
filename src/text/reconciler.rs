//! Reconciliation of on-screen text with the recognizer's latest hypothesis.
//!
//! The recognizer sends cumulative hypotheses that may revise earlier words.
//! [`TextReconciler`] tracks what has actually been typed and converges the
//! screen to each new hypothesis with one batched backspace run plus one
//! insert (see [`compute_edit`]).  Long inserts route through paste, short
//! ones through direct keystrokes.
//!
//! # Target-window safety
//!
//! Backspaces are destructive: issued into the wrong window they would eat
//! someone else's text.  Before any deletion the current foreground window
//! is compared against the target captured at session start.  On mismatch
//! the edit is abandoned, the text already on screen is folded into the
//! committed transcript, and the baseline rebases so the next hypothesis
//! types into the newly focused window from scratch.
//!
//! # Serialization
//!
//! The reconciler is not internally synchronized.  The session controller
//! owns it behind a single-flight `tokio::sync::Mutex`, which serializes
//! hypothesis application and the teardown flush.

use crate::window::{WindowHandle, WindowTracker};

use super::diff::compute_edit;
use super::emitter::{EmitError, TextEmitter};

// ---------------------------------------------------------------------------
// EmissionState
// ---------------------------------------------------------------------------

/// What the reconciler believes about the screen and the session transcript.
///
/// `emitted_chars` counts characters of `hypothesis` that were actually
/// typed; it only advances after an emission call returns `Ok`, so it never
/// exceeds what is really on screen.
#[derive(Debug, Default, Clone)]
struct EmissionState {
    /// Working hypothesis for the current segment (diff baseline).
    hypothesis: String,
    /// Characters of `hypothesis` present on screen.
    emitted_chars: usize,
    /// Finalized session transcript (closed segments plus folded text).
    committed: String,
}

impl EmissionState {
    /// The on-screen portion of the working hypothesis.
    fn on_screen(&self) -> &str {
        let end = byte_of_char(&self.hypothesis, self.emitted_chars);
        &self.hypothesis[..end]
    }
}

/// Byte offset of the `n`-th character of `s` (or `s.len()` past the end).
fn byte_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

// ---------------------------------------------------------------------------
// TextReconciler
// ---------------------------------------------------------------------------

/// Converges on-screen text to the recognizer's latest hypothesis.
pub struct TextReconciler {
    state: EmissionState,
    /// Foreground window captured at session start; gates destructive edits.
    target: Option<WindowHandle>,
    /// Inserts longer than this many characters go through paste.
    paste_threshold: usize,
}

impl TextReconciler {
    pub fn new(paste_threshold: usize) -> Self {
        Self {
            state: EmissionState::default(),
            target: None,
            paste_threshold,
        }
    }

    /// Reset all emission state and record the session's target window.
    pub fn begin_session(&mut self, target: Option<WindowHandle>) {
        self.state = EmissionState::default();
        self.target = target;
    }

    /// The session transcript committed so far.
    pub fn committed(&self) -> &str {
        &self.state.committed
    }

    /// Characters of the working hypothesis currently on screen.
    pub fn emitted_chars(&self) -> usize {
        self.state.emitted_chars
    }

    /// Apply a new cumulative hypothesis for the current segment.
    ///
    /// Computes the minimal edit from the on-screen prefix to `text`, issues
    /// it through `emitter`, and advances the emission state only as far as
    /// the emission actually succeeded.  A final hypothesis closes the
    /// segment: the full text moves into the committed transcript and the
    /// working state resets.
    pub fn apply(
        &mut self,
        text: &str,
        is_final: bool,
        emitter: &dyn TextEmitter,
        windows: &dyn WindowTracker,
    ) -> Result<(), EmitError> {
        let plan = compute_edit(self.state.on_screen(), text);
        debug_assert!(plan.backspaces <= self.state.emitted_chars);

        if plan.backspaces > 0 {
            let foreground = windows.foreground_window();
            if foreground != self.target {
                self.rebase(text, foreground);
                if is_final {
                    self.finalize(text);
                }
                return Ok(());
            }
            emitter.backspace(plan.backspaces)?;
        }

        // The screen now shows exactly the common prefix, which is also a
        // prefix of `text`; rebaseline before attempting the insert so a
        // failed insert leaves the bookkeeping accurate.
        self.state.hypothesis = text.to_string();
        self.state.emitted_chars = plan.common_prefix_chars;

        if !plan.insert.is_empty() {
            if plan.insert.chars().count() > self.paste_threshold {
                emitter.paste(&plan.insert)?;
            } else {
                emitter.type_text(&plan.insert)?;
            }
            self.state.emitted_chars = text.chars().count();
        }

        if is_final {
            self.finalize(text);
        }
        Ok(())
    }

    /// Flush any remaining un-emitted hypothesis text and fold the working
    /// hypothesis into the committed transcript.
    ///
    /// Called during teardown so a session that stops mid-segment still
    /// leaves its last hypothesis in the target application.
    pub fn flush(&mut self, emitter: &dyn TextEmitter) -> Result<(), EmitError> {
        let start = byte_of_char(&self.state.hypothesis, self.state.emitted_chars);
        let remainder = self.state.hypothesis[start..].to_string();
        if !remainder.is_empty() {
            if remainder.chars().count() > self.paste_threshold {
                emitter.paste(&remainder)?;
            } else {
                emitter.type_text(&remainder)?;
            }
        }
        let pending = std::mem::take(&mut self.state.hypothesis);
        self.state.committed.push_str(&pending);
        self.state.emitted_chars = 0;
        Ok(())
    }

    /// Consume the reconciler's transcript and reset for the next session.
    pub fn take_transcript(&mut self) -> String {
        let transcript = std::mem::take(&mut self.state.committed);
        self.state = EmissionState::default();
        self.target = None;
        transcript
    }

    /// The foreground window changed: abandon the edit, keep what was typed
    /// where it is, and restart the baseline against the new window.
    fn rebase(&mut self, text: &str, foreground: Option<WindowHandle>) {
        log::debug!(
            "reconciler: foreground window changed, rebasing ({} chars folded)",
            self.state.emitted_chars
        );
        let folded = self.state.on_screen().to_string();
        self.state.committed.push_str(&folded);
        self.state.hypothesis = text.to_string();
        self.state.emitted_chars = 0;
        self.target = foreground;
    }

    /// Close the current segment: commit the full hypothesis text.
    fn finalize(&mut self, text: &str) {
        self.state.committed.push_str(text);
        self.state.hypothesis.clear();
        self.state.emitted_chars = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::emitter::{EmitOp, RecordingEmitter};
    use crate::window::{FixedWindowTracker, SwitchableWindowTracker};

    const PASTE_THRESHOLD: usize = 12;

    fn fixture() -> (TextReconciler, RecordingEmitter, FixedWindowTracker) {
        let mut rec = TextReconciler::new(PASTE_THRESHOLD);
        let windows = FixedWindowTracker::new(WindowHandle::new(1));
        rec.begin_session(windows.foreground_window());
        (rec, RecordingEmitter::new(), windows)
    }

    // ---- prefix-extending hypotheses ---------------------------------------

    #[test]
    fn prefix_extending_sequence_never_backspaces() {
        let (mut rec, emitter, windows) = fixture();

        for (text, is_final) in [
            ("Hel", false),
            ("Hello", false),
            ("Hello wor", false),
            ("Hello world", true),
        ] {
            rec.apply(text, is_final, &emitter, &windows).unwrap();
        }

        assert_eq!(emitter.screen(), "Hello world");
        assert_eq!(emitter.total_backspaces(), 0);
        assert_eq!(rec.committed(), "Hello world");
        assert_eq!(rec.emitted_chars(), 0); // segment closed
    }

    #[test]
    fn pure_extension_types_only_the_suffix() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("Hello wor", false, &emitter, &windows).unwrap();
        rec.apply("Hello word", true, &emitter, &windows).unwrap();

        assert_eq!(emitter.total_backspaces(), 0);
        assert_eq!(emitter.screen(), "Hello word");
    }

    // ---- revisions ---------------------------------------------------------

    #[test]
    fn revised_tail_costs_exactly_one_backspace() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("Hello worl", false, &emitter, &windows).unwrap();
        rec.apply("Hello word", true, &emitter, &windows).unwrap();

        // Common prefix "Hello wor": one backspace for the stray "l", then
        // the single replacement character.
        assert_eq!(emitter.total_backspaces(), 1);
        assert_eq!(emitter.screen(), "Hello word");
        let ops = emitter.ops();
        assert!(ops.contains(&EmitOp::Backspace(1)));
        assert!(ops.contains(&EmitOp::Type("d".into())));
    }

    #[test]
    fn backspaces_stay_within_emitted_bound() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("short", false, &emitter, &windows).unwrap();
        // Completely different hypothesis: worst case deletes everything.
        rec.apply("other words entirely", false, &emitter, &windows)
            .unwrap();

        assert_eq!(emitter.total_backspaces(), 5);
        assert_eq!(emitter.screen(), "other words entirely");
    }

    // ---- paste vs type routing ---------------------------------------------

    #[test]
    fn long_insert_routes_through_paste() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("a considerably longer hypothesis", false, &emitter, &windows)
            .unwrap();

        assert!(matches!(emitter.ops()[0], EmitOp::Paste(_)));
    }

    #[test]
    fn short_insert_routes_through_keystrokes() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("hi", false, &emitter, &windows).unwrap();

        assert!(matches!(emitter.ops()[0], EmitOp::Type(_)));
    }

    // ---- segment finalization ----------------------------------------------

    #[test]
    fn final_hypothesis_resets_for_next_segment() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("first segment", true, &emitter, &windows).unwrap();
        rec.apply("second", false, &emitter, &windows).unwrap();

        // The second segment starts from an empty baseline: no backspaces
        // into the finalized text.
        assert_eq!(emitter.total_backspaces(), 0);
        assert_eq!(emitter.screen(), "first segmentsecond");
        assert_eq!(rec.committed(), "first segment");
    }

    // ---- target-window safety ----------------------------------------------

    #[test]
    fn window_change_suppresses_backspaces() {
        let mut rec = TextReconciler::new(PASTE_THRESHOLD);
        let windows = SwitchableWindowTracker::new(WindowHandle::new(1));
        let emitter = RecordingEmitter::new();
        rec.begin_session(windows.foreground_window());

        rec.apply("Hello word", false, &emitter, &windows).unwrap();
        windows.switch_to(WindowHandle::new(2));
        // This revision needs a backspace, which must not happen now.
        rec.apply("Hello world", false, &emitter, &windows).unwrap();

        assert_eq!(emitter.total_backspaces(), 0);
        // The old window keeps its text; it is folded into the transcript.
        assert_eq!(rec.committed(), "Hello word");
        assert_eq!(rec.emitted_chars(), 0);
    }

    #[test]
    fn after_rebase_typing_targets_the_new_window() {
        let mut rec = TextReconciler::new(PASTE_THRESHOLD);
        let windows = SwitchableWindowTracker::new(WindowHandle::new(1));
        let emitter = RecordingEmitter::new();
        rec.begin_session(windows.foreground_window());

        rec.apply("Hello word", false, &emitter, &windows).unwrap();
        windows.switch_to(WindowHandle::new(2));
        rec.apply("Hello world", false, &emitter, &windows).unwrap();

        // The rebased baseline accepts destructive edits again in window 2.
        let before = emitter.ops().len();
        rec.apply("Hello world again", false, &emitter, &windows)
            .unwrap();
        assert!(emitter.ops().len() > before);
    }

    // ---- emission failure --------------------------------------------------

    #[test]
    fn failed_insert_does_not_advance_emitted_chars() {
        let (mut rec, emitter, windows) = fixture();
        emitter.fail_inserts();

        assert!(rec.apply("Hello", false, &emitter, &windows).is_err());
        assert_eq!(rec.emitted_chars(), 0);
        assert_eq!(emitter.screen(), "");
    }

    // ---- teardown flush ----------------------------------------------------

    #[test]
    fn flush_emits_pending_remainder_and_folds_hypothesis() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("Hello", false, &emitter, &windows).unwrap();

        // Simulate a hypothesis that arrived but was never emitted in full:
        // fail the insert, then flush with a working emitter.
        emitter.fail_inserts();
        let _ = rec.apply("Hello there", false, &emitter, &windows);
        let flush_emitter = RecordingEmitter::new();
        rec.flush(&flush_emitter).unwrap();

        assert_eq!(flush_emitter.screen(), " there");
        assert_eq!(rec.committed(), "Hello there");
    }

    #[test]
    fn take_transcript_drains_and_resets() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("done", true, &emitter, &windows).unwrap();

        assert_eq!(rec.take_transcript(), "done");
        assert_eq!(rec.committed(), "");
    }

    // ---- multibyte ---------------------------------------------------------

    #[test]
    fn multibyte_revision_counts_backspaces_in_chars() {
        let (mut rec, emitter, windows) = fixture();
        rec.apply("สวัสดีค", false, &emitter, &windows).unwrap();
        rec.apply("สวัสดีครับ", true, &emitter, &windows).unwrap();

        assert_eq!(emitter.total_backspaces(), 0);
        assert_eq!(emitter.screen(), "สวัสดีครับ");
    }
}
