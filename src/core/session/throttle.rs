use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(200);

/// Coalesces UI updates to at most one flush per interval.
///
/// Tracks the accumulator revision and text lengths that were last handed to
/// the UI, so a flush only reports the side that actually changed.
#[derive(Debug, Clone)]
pub struct RenderThrottle {
    interval: Duration,
    last_flush: Option<Instant>,
    rendered_revision: u64,
    rendered_thinking_len: usize,
    rendered_answer_len: usize,
}

/// What a flush has to push to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushPlan {
    pub thinking: bool,
    pub answer: bool,
}

impl RenderThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: None,
            rendered_revision: 0,
            rendered_thinking_len: 0,
            rendered_answer_len: 0,
        }
    }

    pub fn is_dirty(&self, revision: u64) -> bool {
        revision != self.rendered_revision
    }

    pub fn should_flush(&self, now: Instant, revision: u64) -> bool {
        self.is_dirty(revision)
            && self
                .last_flush
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// When the pending change may be flushed, if there is one.
    pub fn deadline(&self, revision: u64) -> Option<Instant> {
        if !self.is_dirty(revision) {
            return None;
        }
        Some(match self.last_flush {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }

    pub fn plan(&self, thinking_len: usize, answer_len: usize) -> FlushPlan {
        FlushPlan {
            thinking: thinking_len != self.rendered_thinking_len,
            answer: answer_len != self.rendered_answer_len,
        }
    }

    pub fn mark_flushed(
        &mut self,
        now: Instant,
        revision: u64,
        thinking_len: usize,
        answer_len: usize,
    ) {
        self.last_flush = Some(now);
        self.rendered_revision = revision;
        self.rendered_thinking_len = thinking_len;
        self.rendered_answer_len = answer_len;
    }
}

impl Default for RenderThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_INTERVAL)
    }
}
