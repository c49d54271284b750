//! Incremental transcript-to-edit reconciliation.
//!
//! Each transcript snapshot supersedes the previous one for the same
//! utterance. Rather than retyping the whole text, the reconciler diffs
//! the snapshot against what it believes the sink currently shows and
//! emits the minimal edit: delete some characters backward, then insert
//! a suffix.
//!
//! Recognizer corrections typically rewrite a suffix while keeping a
//! stable prefix, so a cheap common-prefix diff gated by a length-ratio
//! similarity check is enough; full edit distance would be overkill for a
//! per-frame streaming path. All lengths are in characters, not bytes:
//! transcripts are frequently CJK.

use serde::{Deserialize, Serialize};

/// Default similarity ratio above which two different texts are treated
/// as the same utterance revised, rather than a new utterance.
pub const SIMILARITY_THRESHOLD: f64 = 0.3;

/// Default cap on how many characters a single shrink correction may
/// retract.
pub const MAX_SHRINK_DELETE: usize = 50;

/// The minimal action bringing the sink from the previous snapshot to the
/// current one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOp {
    /// Characters to delete backward from the cursor
    pub delete_count: usize,
    /// Text to insert after the deletion
    pub insert_text: String,
}

impl EditOp {
    /// True when applying this op would change nothing.
    pub fn is_noop(&self) -> bool {
        self.delete_count == 0 && self.insert_text.is_empty()
    }
}

/// Tunable reconciliation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerParams {
    /// Length-ratio gate for the in-place-correction branch
    pub similarity_threshold: f64,
    /// Cap on characters retracted by one shrink correction
    pub max_shrink_delete: usize,
}

impl Default for ReconcilerParams {
    fn default() -> Self {
        Self {
            similarity_threshold: SIMILARITY_THRESHOLD,
            max_shrink_delete: MAX_SHRINK_DELETE,
        }
    }
}

/// Stateful reconciler for one session.
///
/// Tracks the text it believes the sink currently shows for the active
/// utterance. After every call the committed text becomes the full
/// snapshot text, whichever branch fired.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    committed: String,
    params: ReconcilerParams,
}

impl TranscriptReconciler {
    pub fn new(params: ReconcilerParams) -> Self {
        Self {
            committed: String::new(),
            params,
        }
    }

    /// Text currently assumed to be on screen for the active utterance.
    pub fn committed_text(&self) -> &str {
        &self.committed
    }

    /// Forget the committed text, e.g. on deactivation.
    pub fn reset(&mut self) {
        self.committed.clear();
    }

    /// Diff one snapshot against the committed text.
    ///
    /// First match wins:
    /// 1. empty snapshot: utterance boundary, reset committed, no edit
    /// 2. nothing committed: insert everything
    /// 3. snapshot extends committed: insert the new suffix
    /// 4. committed extends snapshot: delete the retracted tail (capped)
    /// 5. similar enough: common-prefix correction; otherwise a new
    ///    utterance appended with no deletion
    pub fn reconcile(&mut self, snapshot_text: &str) -> EditOp {
        let snapshot = snapshot_text.trim();

        // 1. Utterance boundary: on-screen text stays, only the internal
        // pointer resets.
        if snapshot.is_empty() {
            self.committed.clear();
            return EditOp::default();
        }

        let op = if self.committed.is_empty() {
            // 2. Fresh utterance
            EditOp {
                delete_count: 0,
                insert_text: snapshot.to_string(),
            }
        } else if let Some(suffix) = snapshot.strip_prefix(self.committed.as_str()) {
            // 3. Pure extension
            EditOp {
                delete_count: 0,
                insert_text: suffix.to_string(),
            }
        } else if self.committed.starts_with(snapshot) {
            // 4. Recognizer shortened its guess
            let retracted = char_len(&self.committed) - char_len(snapshot);
            EditOp {
                delete_count: retracted.min(self.params.max_shrink_delete),
                insert_text: String::new(),
            }
        } else {
            let committed_len = char_len(&self.committed);
            let snapshot_len = char_len(snapshot);
            let ratio =
                committed_len.min(snapshot_len) as f64 / committed_len.max(snapshot_len) as f64;

            if ratio > self.params.similarity_threshold {
                // 5a. Same utterance, revised: rewrite past the stable prefix
                let prefix = common_prefix_chars(&self.committed, snapshot);
                EditOp {
                    delete_count: committed_len - prefix,
                    insert_text: suffix_from_char(snapshot, prefix).to_string(),
                }
            } else {
                // 5b. A new utterance starting immediately
                EditOp {
                    delete_count: 0,
                    insert_text: snapshot.to_string(),
                }
            }
        };

        self.committed.clear();
        self.committed.push_str(snapshot);
        op
    }
}

/// Character count (Unicode scalar values).
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Length in characters of the longest common leading prefix.
fn common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count()
}

/// The substring starting at the given character offset.
fn suffix_from_char(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}
