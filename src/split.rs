//! Episode splitting orchestrator.
//!
//! Decides whether an episode needs splitting, drives probe → plan → extract,
//! and falls back to midpoint bisection when silence detection fails.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{extract_segment, plan_splits, MediaTool};
use crate::config::{SplitConfig, BYTES_PER_MB};
use crate::error::{PodrelayError, Result};

/// How an episode ended up being split.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SplitStrategy {
    /// The file was under the threshold and returned unchanged.
    Unsplit,
    /// Cuts planned against detected silences, in seconds.
    SilenceAligned { cuts: Vec<f64> },
    /// Silence detection failed; the file was halved recursively.
    Bisected,
}

/// Result of splitting one episode.
#[derive(Debug, Clone, Serialize)]
pub struct SplitOutcome {
    pub source: PathBuf,
    pub parts: Vec<PathBuf>,
    #[serde(flatten)]
    pub strategy: SplitStrategy,
}

impl SplitOutcome {
    pub fn is_split(&self) -> bool {
        self.strategy != SplitStrategy::Unsplit
    }
}

/// Path of the `number`-th part (1-based) of `source`: `<stem>_(<label>_<n>).<ext>`.
pub fn part_path(source: &Path, label: &str, number: usize) -> PathBuf {
    let stem = source.file_stem().unwrap_or_default().to_string_lossy();
    let name = match source.extension() {
        Some(ext) => format!("{stem}_({label}_{number}).{}", ext.to_string_lossy()),
        None => format!("{stem}_({label}_{number})"),
    };
    source.with_file_name(name)
}

/// File size in megabytes (1024 * 1024 bytes).
pub async fn file_size_mb(path: &Path) -> Result<f64> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PodrelayError::FileNotFound(path.display().to_string())
        } else {
            PodrelayError::Io(e)
        }
    })?;
    Ok(meta.len() as f64 / BYTES_PER_MB)
}

/// Splits oversized episodes into lossless parts under a size threshold.
pub struct EpisodeSplitter {
    tool: Arc<dyn MediaTool>,
    config: SplitConfig,
}

impl EpisodeSplitter {
    pub fn new(tool: Arc<dyn MediaTool>, config: SplitConfig) -> Self {
        Self { tool, config }
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Split `path` if it exceeds the threshold, returning part paths in time order.
    ///
    /// A file under the threshold comes back as `[path]`.
    pub async fn split_if_needed(&self, path: &Path) -> Result<Vec<PathBuf>> {
        Ok(self.split(path).await?.parts)
    }

    /// Like [`split_if_needed`](Self::split_if_needed) but also reports the strategy used.
    pub async fn split(&self, path: &Path) -> Result<SplitOutcome> {
        let size_mb = file_size_mb(path).await?;
        let threshold = self.config.size_threshold_mb;

        if size_mb <= threshold {
            debug!(
                "{} is {:.2} MB, under {:.2} MB; no split needed",
                path.display(),
                size_mb,
                threshold
            );
            return Ok(SplitOutcome {
                source: path.to_path_buf(),
                parts: vec![path.to_path_buf()],
                strategy: SplitStrategy::Unsplit,
            });
        }

        info!(
            "{} is {:.2} MB, over the {:.2} MB limit; splitting with {}",
            path.display(),
            size_mb,
            threshold,
            self.tool.name()
        );

        let duration = self.tool.duration(path).await?;

        match self.tool.silences(path, &self.config.silence).await {
            Ok(silences) => {
                let parts = (size_mb / threshold).ceil().max(1.0) as u64;
                let ideal = ideal_segment(duration, parts)?;
                let plan = plan_splits(duration, ideal, &silences, self.config.max_drift)?;

                info!(
                    "Planned {} parts of ~{:.1}s using {} silences",
                    plan.len(),
                    ideal.as_secs_f64(),
                    silences.len()
                );

                let outputs = self.extract_planned(path, &plan.ranges()).await?;
                Ok(SplitOutcome {
                    source: path.to_path_buf(),
                    parts: outputs,
                    strategy: SplitStrategy::SilenceAligned {
                        cuts: plan.cuts().iter().map(Duration::as_secs_f64).collect(),
                    },
                })
            }
            Err(e) if e.is_probe() => {
                warn!(
                    "Silence detection failed for {}, bisecting instead: {}",
                    path.display(),
                    e
                );
                let outputs = self.bisect(path, duration).await?;
                Ok(SplitOutcome {
                    source: path.to_path_buf(),
                    parts: outputs,
                    strategy: SplitStrategy::Bisected,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn extract_planned(
        &self,
        source: &Path,
        ranges: &[(Duration, Option<Duration>)],
    ) -> Result<Vec<PathBuf>> {
        let mut produced = Vec::with_capacity(ranges.len());

        for (index, &(start, end)) in ranges.iter().enumerate() {
            let output = part_path(source, &self.config.part_label, index + 1);
            let result = extract_segment(
                self.tool.as_ref(),
                source,
                start,
                end,
                &output,
                self.config.min_segment_bytes,
            )
            .await;

            match result {
                Ok(path) => produced.push(path),
                Err(e) => {
                    produced.push(output);
                    remove_files(&produced).await;
                    return Err(e);
                }
            }
        }

        Ok(produced)
    }

    /// Halve `source` at its midpoint, recursing into halves still over the threshold.
    async fn bisect(&self, source: &Path, duration: Duration) -> Result<Vec<PathBuf>> {
        if duration.is_zero() {
            return Err(PodrelayError::PlanningDegenerate(format!(
                "{} has zero duration",
                source.display()
            )));
        }

        let parent = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let scratch = tempfile::Builder::new()
            .prefix(".podrelay-split-")
            .tempdir_in(parent)?;
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut pending: VecDeque<(PathBuf, Duration, u32)> = VecDeque::new();
        pending.push_back((source.to_path_buf(), duration, 0));
        let mut leaves = Vec::new();
        let mut counter = 0usize;

        while let Some((piece, length, depth)) = pending.pop_front() {
            let is_source = piece.as_path() == source;

            if !is_source {
                let size_mb = file_size_mb(&piece).await?;
                if size_mb <= self.config.size_threshold_mb {
                    leaves.push(piece);
                    continue;
                }
                if depth >= self.config.max_bisect_depth {
                    warn!(
                        "Accepting {:.2} MB piece at bisection depth {}",
                        size_mb, depth
                    );
                    leaves.push(piece);
                    continue;
                }
            }

            let half = length / 2;
            let mut halves = Vec::with_capacity(2);
            for (start, end, len) in [(Duration::ZERO, Some(half), half), (half, None, length - half)] {
                counter += 1;
                let output = scratch.path().join(format!("piece_{counter:03}{ext}"));
                extract_segment(
                    self.tool.as_ref(),
                    &piece,
                    start,
                    end,
                    &output,
                    self.config.min_segment_bytes,
                )
                .await?;
                halves.push((output, len, depth + 1));
            }

            debug!(
                "Bisected {} at {:.3}s (depth {})",
                piece.display(),
                half.as_secs_f64(),
                depth + 1
            );

            if !is_source {
                tokio::fs::remove_file(&piece).await?;
            }
            for half in halves.into_iter().rev() {
                pending.push_front(half);
            }
        }

        let mut outputs = Vec::with_capacity(leaves.len());
        for (index, leaf) in leaves.iter().enumerate() {
            let output = part_path(source, &self.config.part_label, index + 1);
            if let Err(e) = tokio::fs::rename(leaf, &output).await {
                remove_files(&outputs).await;
                return Err(e.into());
            }
            outputs.push(output);
        }

        info!("Bisected {} into {} parts", source.display(), outputs.len());
        Ok(outputs)
    }
}

/// Segment length that divides `duration` into exactly `parts` pieces, rounded
/// up to the next nanosecond.
fn ideal_segment(duration: Duration, parts: u64) -> Result<Duration> {
    let nanos = duration.as_nanos().div_ceil(u128::from(parts.max(1)));
    u64::try_from(nanos)
        .map(Duration::from_nanos)
        .map_err(|_| {
            PodrelayError::PlanningDegenerate(format!(
                "{:.3}s is too long to plan",
                duration.as_secs_f64()
            ))
        })
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CannedTool, SilentInterval, ToolCall};
    use tempfile::TempDir;

    const MB: usize = 1024 * 1024;

    fn config(threshold_mb: f64) -> SplitConfig {
        SplitConfig {
            size_threshold_mb: threshold_mb,
            min_segment_bytes: 16,
            ..SplitConfig::default()
        }
    }

    fn write_source(dir: &TempDir, name: &str, bytes: usize) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[test]
    fn test_part_path() {
        let source = Path::new("/downloads/show/Episode 12.mp3");
        assert_eq!(
            part_path(source, "parte", 2),
            PathBuf::from("/downloads/show/Episode 12_(parte_2).mp3")
        );
        assert_eq!(
            part_path(Path::new("raw"), "part", 1),
            PathBuf::from("raw_(part_1)")
        );
    }

    #[tokio::test]
    async fn test_under_threshold_is_untouched() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "small.mp3", 1_000);
        let tool = Arc::new(CannedTool::new(100.0));
        let splitter = EpisodeSplitter::new(tool.clone(), config(1.0));

        let outcome = splitter.split(&source).await.unwrap();

        assert_eq!(outcome.parts, vec![source]);
        assert_eq!(outcome.strategy, SplitStrategy::Unsplit);
        assert!(tool.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let splitter = EpisodeSplitter::new(Arc::new(CannedTool::new(1.0)), config(1.0));
        let result = splitter.split_if_needed(Path::new("/nonexistent/x.mp3")).await;
        assert!(matches!(result, Err(PodrelayError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_silence_aligned_split() {
        let dir = TempDir::new().unwrap();
        // 2 MB at ~17476 bytes/s is 120s; a 1 MB threshold asks for 2 parts.
        let bytes_per_sec = (2 * MB) as f64 / 120.0;
        let source = write_source(&dir, "episode.mp3", 2 * MB);
        let tool = Arc::new(
            CannedTool::new(bytes_per_sec)
                .with_silences(vec![SilentInterval::from_secs_f64(58.0, 61.0)]),
        );
        let splitter = EpisodeSplitter::new(tool.clone(), config(1.0));

        let outcome = splitter.split(&source).await.unwrap();

        assert_eq!(
            outcome.parts,
            vec![
                dir.path().join("episode_(parte_1).mp3"),
                dir.path().join("episode_(parte_2).mp3"),
            ]
        );
        match &outcome.strategy {
            SplitStrategy::SilenceAligned { cuts } => {
                assert_eq!(cuts.len(), 2);
                assert!((cuts[1] - 59.5).abs() < 1e-6);
            }
            other => panic!("Expected silence-aligned split, got {other:?}"),
        }

        let copies: Vec<_> = tool
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ToolCall::Copy { .. }))
            .collect();
        assert_eq!(copies.len(), 2);
        assert!(outcome.parts.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_corrupt_part_fails_whole_split() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "episode.mp3", 3 * MB);
        let tool = Arc::new(CannedTool::new(MB as f64 / 60.0).with_part_size(1, 0));
        let splitter = EpisodeSplitter::new(tool, config(1.0));

        let result = splitter.split_if_needed(&source).await;

        assert!(matches!(result, Err(PodrelayError::CorruptSegment { .. })));
        for n in 1..=3 {
            assert!(!part_path(&source, "parte", n).exists(), "part {n} left behind");
        }
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_bisection_fallback() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "episode.mp3", 3 * MB);
        let tool = Arc::new(CannedTool::new(MB as f64 / 60.0).with_silence_failure("boom"));
        let splitter = EpisodeSplitter::new(tool, config(1.0));

        let outcome = splitter.split(&source).await.unwrap();

        assert_eq!(outcome.strategy, SplitStrategy::Bisected);
        // 3 MB -> 1.5 + 1.5 -> four 0.75 MB leaves.
        assert_eq!(outcome.parts.len(), 4);
        for (i, part) in outcome.parts.iter().enumerate() {
            assert_eq!(part, &part_path(&source, "parte", i + 1));
            assert!(file_size_mb(part).await.unwrap() <= 1.0);
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".podrelay-split-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_bisection_respects_depth_limit() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "episode.mp3", 4 * MB);
        let tool = Arc::new(CannedTool::new(MB as f64 / 60.0).with_silence_failure("boom"));
        let splitter = EpisodeSplitter::new(
            tool,
            SplitConfig {
                max_bisect_depth: 1,
                ..config(1.0)
            },
        );

        let parts = splitter.split_if_needed(&source).await.unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_duration_is_degenerate() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "episode.mp3", 2 * MB);
        let splitter = EpisodeSplitter::new(Arc::new(CannedTool::new(f64::INFINITY)), config(1.0));

        let result = splitter.split(&source).await;
        assert!(matches!(result, Err(PodrelayError::PlanningDegenerate(_))));
    }

    #[test]
    fn test_ideal_segment_plans_requested_parts() {
        use crate::audio::segment_count;

        for (duration, parts) in [
            (Duration::new(100, 0), 3),
            (Duration::new(3599, 999_999_999), 7),
            (Duration::new(60, 50), 2),
        ] {
            let ideal = ideal_segment(duration, parts).unwrap();
            assert_eq!(segment_count(duration, ideal), u128::from(parts), "{duration:?}");
        }
    }

    #[tokio::test]
    async fn test_tiny_threshold_is_degenerate() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "episode.mp3", 2 * MB);
        let tool = Arc::new(CannedTool::new((2 * MB) as f64 / 120.0));
        let splitter = EpisodeSplitter::new(tool.clone(), config(1e-12));

        let result = splitter.split(&source).await;

        assert!(matches!(result, Err(PodrelayError::PlanningDegenerate(_))));
        assert!(!tool.calls().iter().any(|c| matches!(c, ToolCall::Copy { .. })));
        assert!(source.exists());
    }
}
