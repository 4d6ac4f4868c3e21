//! Per-batch progression state.
//!
//! A batch collects segment results keyed by index and moves through an
//! explicit phase. All decisions about whether to advance the chain, merge,
//! or ignore an event are made here, under the orchestrator's lock.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum BatchPhase {
    /// Waiting for segment completions.
    Collecting,
    /// A "create next segment" operation is in flight for `from_segment`.
    #[serde(rename_all = "camelCase")]
    Advancing { from_segment: usize },
    Merging,
    Merged,
}

/// Why a completion event was accepted but did not lead anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Duplicate,
    OutOfRange,
}

/// What the orchestrator should do after a segment was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Create segment `from_segment + 1`.
    Advance { from_segment: usize },
    /// Every segment is present: merge these URLs, in segment order.
    Merge { urls: Vec<String> },
    /// Another operation already holds the guard.
    Busy,
    /// Nothing to do until more segments arrive.
    Wait,
}

#[derive(Debug)]
pub struct BatchState {
    total_segments: usize,
    completed: BTreeMap<usize, String>,
    processed: HashSet<usize>,
    phase: BatchPhase,
    cancel: CancellationToken,
}

impl BatchState {
    pub fn new(total_segments: usize) -> Self {
        Self {
            total_segments,
            completed: BTreeMap::new(),
            processed: HashSet::new(),
            phase: BatchPhase::Collecting,
            cancel: CancellationToken::new(),
        }
    }

    pub fn total_segments(&self) -> usize {
        self.total_segments
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.phase == BatchPhase::Merged
    }

    /// Record a completed segment. Each index is accepted at most once.
    pub fn record(&mut self, segment_index: usize, url: Option<&str>) -> Result<(), Rejection> {
        if segment_index == 0 || segment_index > self.total_segments {
            return Err(Rejection::OutOfRange);
        }
        if !self.processed.insert(segment_index) {
            return Err(Rejection::Duplicate);
        }
        if let Some(url) = url {
            self.completed.insert(segment_index, url.to_string());
        }
        Ok(())
    }

    /// Decide the next step after `segment_index` was recorded and move the
    /// phase accordingly. The caller must report back through
    /// [`finish_advance`](Self::finish_advance) or
    /// [`finish_merge`](Self::finish_merge).
    pub fn decide(&mut self, segment_index: usize) -> Decision {
        if self.completed.len() == self.total_segments {
            return self.begin_merge();
        }

        if segment_index >= self.total_segments {
            return Decision::Wait;
        }

        match self.phase {
            BatchPhase::Merging | BatchPhase::Merged => Decision::Busy,
            BatchPhase::Advancing { from_segment } if from_segment == segment_index => {
                Decision::Busy
            }
            _ => {
                self.phase = BatchPhase::Advancing {
                    from_segment: segment_index,
                };
                Decision::Advance {
                    from_segment: segment_index,
                }
            }
        }
    }

    /// Enter the merge phase if every segment is present and no merge has
    /// started or finished yet.
    pub fn begin_merge(&mut self) -> Decision {
        if self.completed.len() != self.total_segments {
            return Decision::Wait;
        }
        match self.phase {
            BatchPhase::Merging | BatchPhase::Merged => Decision::Busy,
            _ => {
                self.phase = BatchPhase::Merging;
                Decision::Merge {
                    urls: self.completed.values().cloned().collect(),
                }
            }
        }
    }

    /// Release the "create next" guard held for `from_segment`, whatever the result.
    pub fn finish_advance(&mut self, from_segment: usize) {
        if self.phase == (BatchPhase::Advancing { from_segment }) {
            self.phase = BatchPhase::Collecting;
        }
    }

    /// Leave the merge phase. A failed merge returns to `Collecting` so it
    /// can be triggered again by hand.
    pub fn finish_merge(&mut self, succeeded: bool) {
        if self.phase == BatchPhase::Merging {
            self.phase = if succeeded {
                BatchPhase::Merged
            } else {
                BatchPhase::Collecting
            };
        }
    }
}
