use std::time::{Duration, Instant};

/// Progress snapshot for an image being synthesized token by token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageProgress {
    pub count: u32,
    pub total: u32,
    pub progress: f64,
    pub elapsed: Duration,
}

/// Turns image-token batches into progress reports.
///
/// The first batch is the prompt: it only arms the streamer and starts the clock.
#[derive(Debug, Clone)]
pub struct ImageProgressStreamer {
    total: u32,
    count: Option<u32>,
    started_at: Option<Instant>,
}

impl ImageProgressStreamer {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            count: None,
            started_at: None,
        }
    }

    pub fn put(&mut self, at: Instant) -> Option<ImageProgress> {
        let Some(count) = self.count.as_mut() else {
            self.count = Some(0);
            self.started_at = Some(at);
            return None;
        };

        *count += 1;
        let count = *count;
        let progress = if self.total == 0 {
            1.0
        } else {
            f64::from(count) / f64::from(self.total)
        };
        let elapsed = self
            .started_at
            .map(|started| at.saturating_duration_since(started))
            .unwrap_or_default();

        Some(ImageProgress {
            count,
            total: self.total,
            progress,
            elapsed,
        })
    }
}
