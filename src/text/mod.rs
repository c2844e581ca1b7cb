//! Text output pipeline — diff computation → emission → reconciliation.
//!
//! ```text
//! hypothesis ──▶ compute_edit ──▶ TextReconciler ──▶ TextEmitter
//!                 (minimal edit)   (state + window     (backspace /
//!                                   safety gate)        paste / type)
//! ```

pub mod diff;
pub mod emitter;
pub mod reconciler;

pub use diff::{compute_edit, EditPlan};
pub use emitter::{escape_for_typing, ClipboardEmitter, EmitError, TextEmitter};
pub use reconciler::TextReconciler;
