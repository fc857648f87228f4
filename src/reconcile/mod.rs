//! Snapshot-to-delta reconciliation.
//!
//! The upstream never sends true deltas: every `process_generating` event
//! carries the entire reply so far, and the markup of already-streamed text
//! mutates as rendering finalizes (a literal ``` fence turns into
//! `<pre><code>` mid-stream). [`DeltaReconciler`] converts that feed into
//! disjoint plain-text deltas whose concatenation is the caller's transcript.

pub mod normalize;

pub use normalize::{NormalizedSnapshot, normalize};

/// The two transitional shapes a closing fence passes through while the
/// upstream re-renders it: two literal backticks butting against a closing
/// code marker or against the next tag.
const FENCE_CLOSE_BLOCK: &str = ">\n``\n</code>";
const FENCE_CLOSE_INLINE: &str = ">``<";

/// Stateful snapshot-to-delta converter for one streaming session.
#[derive(Debug, Default)]
pub struct DeltaReconciler {
    /// Plain text already handed to the caller.
    last_plain: String,
    /// How far into the normalized markup fence-close artifacts have been
    /// scanned. Advances monotonically so each artifact is corrected once.
    fence_scan_offset: usize,
}

impl DeltaReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next cumulative snapshot; returns the delta to append
    /// (possibly empty).
    pub fn push(&mut self, raw: &str) -> String {
        let norm = normalize(raw);

        let mut delta = if let Some(suffix) = norm.plain.strip_prefix(self.last_plain.as_str()) {
            let suffix = suffix.to_string();
            self.last_plain = norm.plain.clone();
            suffix
        } else if norm.plain.len() < self.last_plain.len() {
            // Retroactive shrink from a re-render: forget the transcript so
            // the next snapshot re-derives whatever needs to reappear.
            self.last_plain.clear();
            String::new()
        } else {
            // Divergence with no prefix relation: drop this tick and resync.
            self.last_plain = norm.plain.clone();
            String::new()
        };

        if let Some(rel) = self.find_fence_close(&norm.markup) {
            // The fence is closing: the double backtick that already went out
            // becomes a proper triple, and the remembered transcript gives
            // those two characters back so the final text is not doubled.
            self.fence_scan_offset += rel;
            delta = delta.replace("``", "```");
            let trimmed = self.last_plain.len().saturating_sub(2);
            if self.last_plain.is_char_boundary(trimmed) {
                self.last_plain.truncate(trimmed);
            }
        }

        delta
    }

    /// Current transcript as the caller has seen it.
    pub fn transcript(&self) -> &str {
        &self.last_plain
    }

    /// Look for a fence-close artifact past the scan offset. A match at the
    /// offset itself was already corrected on a previous tick and is skipped.
    fn find_fence_close(&self, markup: &str) -> Option<usize> {
        let tail = markup.get(self.fence_scan_offset..)?;
        for pattern in [FENCE_CLOSE_BLOCK, FENCE_CLOSE_INLINE] {
            if let Some(idx) = tail.find(pattern) {
                if idx > 0 {
                    return Some(idx);
                }
            }
        }
        None
    }
}
