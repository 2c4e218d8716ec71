//! Render timing accumulator: count, total, min, max, average.

use serde::Serialize;

// ─── Types ──────────────────────────────────────────────────────────

/// Summary of all renders recorded so far. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RenderSummary {
    pub render_count: u64,
    pub total_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub avg_time: f64,
}

// ─── RenderStats ────────────────────────────────────────────────────

/// Running render statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    count: u64,
    total_secs: f64,
    /// `None` until the first sample.
    min_secs: Option<f64>,
    max_secs: f64,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one render duration. Negative or NaN inputs count as zero.
    pub fn track_render(&mut self, duration_secs: f64) {
        let secs = if duration_secs.is_finite() && duration_secs > 0.0 {
            duration_secs
        } else {
            0.0
        };
        self.count = self.count.saturating_add(1);
        self.total_secs += secs;
        self.min_secs = Some(self.min_secs.map_or(secs, |m| m.min(secs)));
        self.max_secs = self.max_secs.max(secs);
    }

    pub fn render_count(&self) -> u64 {
        self.count
    }

    pub fn summary(&self) -> RenderSummary {
        let avg_time = if self.count == 0 {
            0.0
        } else {
            self.total_secs / self.count as f64
        };
        RenderSummary {
            render_count: self.count,
            total_time: self.total_secs,
            min_time: self.min_secs.unwrap_or(0.0),
            max_time: self.max_secs,
            avg_time,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
