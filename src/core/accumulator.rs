use crate::core::stream_decoder::{DeltaKind, StreamDelta};

/// Owned copy of the accumulated text at one point in the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSnapshot {
    pub thinking: String,
    pub answer: String,
}

impl ResponseSnapshot {
    pub fn is_empty(&self) -> bool {
        self.thinking.is_empty() && self.answer.is_empty()
    }
}

/// Folds stream deltas into the thinking and answer text of one turn.
///
/// Both strings only ever grow, in arrival order. The fold is synchronous so
/// the accumulator always holds the true state even when UI updates are
/// being coalesced.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    thinking: String,
    answer: String,
    revision: u64,
    complete: bool,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: &StreamDelta) {
        if delta.text.is_empty() {
            return;
        }
        match delta.kind {
            DeltaKind::Thinking => self.thinking.push_str(&delta.text),
            DeltaKind::Answer => self.answer.push_str(&delta.text),
        }
        self.revision += 1;
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot {
            thinking: self.thinking.clone(),
            answer: self.answer.clone(),
        }
    }

    /// Bumped once per applied delta; lets renderers detect unseen changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_output(&self) -> bool {
        !self.thinking.is_empty() || !self.answer.is_empty()
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_concatenates_each_kind_in_arrival_order() {
        let deltas = [
            StreamDelta::thinking("Let me "),
            StreamDelta::answer("The "),
            StreamDelta::thinking("think."),
            StreamDelta::answer("answer "),
            StreamDelta::answer("is 4"),
        ];

        let mut accumulator = ResponseAccumulator::new();
        for delta in &deltas {
            accumulator.apply(delta);
        }

        let expected_thinking: String = deltas
            .iter()
            .filter(|d| d.kind == DeltaKind::Thinking)
            .map(|d| d.text.as_str())
            .collect();
        let expected_answer: String = deltas
            .iter()
            .filter(|d| d.kind == DeltaKind::Answer)
            .map(|d| d.text.as_str())
            .collect();

        let snapshot = accumulator.snapshot();
        assert_eq!(snapshot.thinking, expected_thinking);
        assert_eq!(snapshot.answer, expected_answer);
        assert_eq!(accumulator.revision(), 5);
    }

    #[test]
    fn snapshot_is_detached_from_later_folds() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.apply(&StreamDelta::answer("de"));
        let before = accumulator.snapshot();
        accumulator.apply(&StreamDelta::answer("f"));

        assert_eq!(before.answer, "de");
        assert_eq!(accumulator.answer(), "def");
    }

    #[test]
    fn empty_deltas_do_not_bump_revision() {
        let mut accumulator = ResponseAccumulator::new();
        accumulator.apply(&StreamDelta::thinking(""));
        assert_eq!(accumulator.revision(), 0);
        assert!(!accumulator.has_output());
        assert!(accumulator.snapshot().is_empty());
    }

    #[test]
    fn completion_is_tracked_separately() {
        let mut accumulator = ResponseAccumulator::new();
        assert!(!accumulator.is_complete());
        accumulator.mark_complete();
        assert!(accumulator.is_complete());
    }
}
