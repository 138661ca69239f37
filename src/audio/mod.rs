pub mod extract;
pub mod plan;
pub mod probe;
pub mod tool;

pub use extract::{copy_segment, extract_segment};
pub use plan::{plan_splits, segment_count, SplitPlan, MAX_SEGMENTS};
pub use probe::{check_ffmpeg, check_ffprobe, find_silences, get_duration, parse_silence_log};
pub use tool::{CannedTool, FfmpegTool, MediaTool, ToolCall};

use std::time::Duration;

/// A span where the signal stayed below the noise threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilentInterval {
    pub start: Duration,
    pub end: Duration,
}

impl SilentInterval {
    pub fn new(start: Duration, end: Duration) -> Self {
        Self { start, end }
    }

    /// Convenience constructor from seconds.
    pub fn from_secs_f64(start: f64, end: f64) -> Self {
        Self::new(Duration::from_secs_f64(start), Duration::from_secs_f64(end))
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// Midpoint of the interval; cuts land here.
    pub fn midpoint(&self) -> Duration {
        (self.start + self.end) / 2
    }
}
