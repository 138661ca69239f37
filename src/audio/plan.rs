use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use crate::error::{PodrelayError, Result};

use super::SilentInterval;

/// Upper bound on segments per episode; anything above is a degenerate request.
pub const MAX_SEGMENTS: usize = 10_000;

/// Ordered cut timestamps. The first cut is always zero and the end of the file
/// is the implicit final boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    cuts: Vec<Duration>,
}

impl SplitPlan {
    pub fn cuts(&self) -> &[Duration] {
        &self.cuts
    }

    /// Number of segments this plan produces.
    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// Whether the plan actually splits anything.
    pub fn is_split(&self) -> bool {
        self.cuts.len() > 1
    }

    /// `(start, end)` per segment; the last segment runs to end of file (`None`).
    pub fn ranges(&self) -> Vec<(Duration, Option<Duration>)> {
        self.cuts
            .iter()
            .enumerate()
            .map(|(i, &start)| (start, self.cuts.get(i + 1).copied()))
            .collect()
    }
}

/// Number of segments needed to keep each one at or under `ideal_segment`.
///
/// Computed on whole nanoseconds, so it is exactly `ceil(total / ideal_segment)`.
/// A zero `ideal_segment` saturates to `u128::MAX`.
pub fn segment_count(total: Duration, ideal_segment: Duration) -> u128 {
    match ideal_segment.as_nanos() {
        0 => u128::MAX,
        ideal => total.as_nanos().div_ceil(ideal).max(1),
    }
}

/// Compute cut points for `total`, aligned to silence midpoints where possible.
///
/// For each ideal cut `i * ideal_segment`, the unused silence whose midpoint is
/// closest wins, provided it is within `max_drift`; otherwise the ideal time is
/// used as-is. Silences are scanned in the order given (ascending start), so the
/// earlier interval wins a tie. A candidate must fall after the previous cut and
/// before the next ideal cut, which keeps the plan strictly increasing.
pub fn plan_splits(
    total: Duration,
    ideal_segment: Duration,
    silences: &[SilentInterval],
    max_drift: Duration,
) -> Result<SplitPlan> {
    if total.is_zero() {
        return Err(PodrelayError::PlanningDegenerate(
            "total duration is zero".to_string(),
        ));
    }
    if ideal_segment.is_zero() {
        return Err(PodrelayError::PlanningDegenerate(
            "ideal segment duration is zero".to_string(),
        ));
    }

    let count = segment_count(total, ideal_segment);
    let count = match usize::try_from(count) {
        Ok(count) if count <= MAX_SEGMENTS => count,
        _ => {
            return Err(PodrelayError::PlanningDegenerate(format!(
                "{:.3}s in segments of {:?} needs {} parts (limit {})",
                total.as_secs_f64(),
                ideal_segment,
                count,
                MAX_SEGMENTS
            )))
        }
    };

    let mut cuts = Vec::with_capacity(count);
    cuts.push(Duration::ZERO);

    let mut used: HashSet<usize> = HashSet::new();

    for i in 1..count {
        let ideal_time = nth_boundary(ideal_segment, i)?;
        let previous = cuts.last().copied().unwrap_or(Duration::ZERO);
        let upper = nth_boundary(ideal_segment, i + 1)?.min(total);

        let mut closest: Option<(usize, Duration, Duration)> = None;
        for (index, silence) in silences.iter().enumerate() {
            if used.contains(&index) {
                continue;
            }
            let mid = silence.midpoint();
            if mid <= previous || mid >= upper {
                continue;
            }
            let distance = mid.abs_diff(ideal_time);
            if closest.map_or(true, |(_, _, best)| distance < best) {
                closest = Some((index, mid, distance));
            }
        }

        let cut = match closest {
            Some((index, mid, distance)) if distance <= max_drift => {
                used.insert(index);
                mid
            }
            _ => ideal_time,
        };

        debug!(
            "Cut {}: ideal {:.3}s -> {:.3}s",
            i,
            ideal_time.as_secs_f64(),
            cut.as_secs_f64()
        );
        cuts.push(cut);
    }

    Ok(SplitPlan { cuts })
}

fn nth_boundary(ideal_segment: Duration, n: usize) -> Result<Duration> {
    u32::try_from(n)
        .ok()
        .and_then(|n| ideal_segment.checked_mul(n))
        .ok_or_else(|| {
            PodrelayError::PlanningDegenerate(format!(
                "cut {n} of {ideal_segment:?} overflows"
            ))
        })
}
