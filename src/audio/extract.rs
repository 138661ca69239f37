use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::BYTES_PER_MB;
use crate::error::{PodrelayError, Result};

use super::MediaTool;

/// Copy `[start, end)` of `input` into `output` without re-encoding.
///
/// `end = None` copies through end of file. All streams and container metadata
/// are kept so embedded cover art and tags survive the split.
pub async fn copy_segment(
    input: &Path,
    start: Duration,
    end: Option<Duration>,
    output: &Path,
) -> Result<()> {
    if !input.exists() {
        return Err(PodrelayError::FileNotFound(input.display().to_string()));
    }

    let (start_secs, length_secs) = seek_args(start, end);

    let mut command = Command::new("ffmpeg");
    command
        .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(input)
        .arg("-ss")
        .arg(&start_secs);

    if let Some(length) = &length_secs {
        command.arg("-t").arg(length);
    }

    command
        .args(["-map", "0", "-map_metadata", "0", "-c", "copy"])
        .arg(output);

    debug!(
        "Copying segment: start={}, end={:?}, output={}",
        start_secs,
        end.map(|e| e.as_secs_f64()),
        output.display()
    );

    let result = command
        .output()
        .await
        .map_err(|e| PodrelayError::Extraction(format!("Failed to run FFmpeg: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(PodrelayError::Extraction(format!(
            "FFmpeg segment copy failed for {}: {}",
            output.display(),
            stderr.trim()
        )));
    }

    Ok(())
}

/// `-ss` and `-t` values in milliseconds. Both ends are rounded first and the
/// length is their difference, so adjacent segments share the same boundary.
fn seek_args(start: Duration, end: Option<Duration>) -> (String, Option<String>) {
    let start_ms = round_millis(start);
    let length = end.map(|end| format_millis(round_millis(end).saturating_sub(start_ms)));
    (format_millis(start_ms), length)
}

fn round_millis(d: Duration) -> u128 {
    (d.as_nanos() + 500_000) / 1_000_000
}

fn format_millis(ms: u128) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Materialize one segment through `tool` and verify it is not degenerate.
///
/// The output must exist and be larger than `min_bytes`; otherwise the segment is
/// reported as [`PodrelayError::CorruptSegment`].
pub async fn extract_segment(
    tool: &dyn MediaTool,
    source: &Path,
    start: Duration,
    end: Option<Duration>,
    output: &Path,
    min_bytes: u64,
) -> Result<PathBuf> {
    if let Some(end) = end {
        if end <= start {
            return Err(PodrelayError::Extraction(format!(
                "Empty range {:.3}s..{:.3}s for {}",
                start.as_secs_f64(),
                end.as_secs_f64(),
                output.display()
            )));
        }
    }

    tool.copy_segment(source, start, end, output).await?;

    let size = match tokio::fs::metadata(output).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    if size <= min_bytes {
        error!(
            "Segment too small: {} ({} bytes, minimum {})",
            output.display(),
            size,
            min_bytes
        );
        return Err(PodrelayError::CorruptSegment {
            path: output.to_path_buf(),
            size,
            min: min_bytes,
        });
    }

    info!(
        "Segment written: {} ({:.2} MB)",
        output.display(),
        size as f64 / BYTES_PER_MB
    );
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CannedTool;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_extract_segment_writes_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("episode.mp3");
        std::fs::write(&source, vec![0u8; 10_000]).unwrap();

        let tool = CannedTool::new(100.0);
        let output = dir.path().join("part.mp3");
        let path = extract_segment(
            &tool,
            &source,
            Duration::from_secs(10),
            Some(Duration::from_secs(30)),
            &output,
            100,
        )
        .await
        .unwrap();

        assert_eq!(path, output);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 2_000);
    }

    #[tokio::test]
    async fn test_extract_segment_rejects_small_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("episode.mp3");
        std::fs::write(&source, vec![0u8; 10_000]).unwrap();

        let tool = CannedTool::new(100.0).with_part_size(0, 0);
        let output = dir.path().join("part.mp3");
        let result =
            extract_segment(&tool, &source, Duration::ZERO, None, &output, 100).await;

        match result {
            Err(PodrelayError::CorruptSegment { size, min, .. }) => {
                assert_eq!(size, 0);
                assert_eq!(min, 100);
            }
            other => panic!("Expected CorruptSegment, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_segment_rejects_empty_range() {
        let tool = CannedTool::new(100.0);
        let result = extract_segment(
            &tool,
            Path::new("/tmp/source.mp3"),
            Duration::from_secs(5),
            Some(Duration::from_secs(5)),
            Path::new("/tmp/part.mp3"),
            0,
        )
        .await;

        assert!(matches!(result, Err(PodrelayError::Extraction(_))));
        assert!(tool.calls().is_empty());
    }

    #[test]
    fn test_seek_args_round_boundaries_once() {
        let cut = Duration::from_micros(59_499_600);

        let (start, length) = seek_args(Duration::from_micros(10_000_400), Some(cut));
        assert_eq!(start, "10.000");
        assert_eq!(length.as_deref(), Some("49.500"));

        let (next_start, tail) = seek_args(cut, None);
        assert_eq!(next_start, "59.500");
        assert_eq!(tail, None);
    }

    #[test]
    fn test_seek_args_whole_seconds() {
        let (start, length) = seek_args(Duration::ZERO, Some(Duration::from_secs(3725)));
        assert_eq!(start, "0.000");
        assert_eq!(length.as_deref(), Some("3725.000"));
    }

    #[tokio::test]
    async fn test_copy_segment_missing_input() {
        let result = copy_segment(
            Path::new("/nonexistent/file.mp3"),
            Duration::ZERO,
            None,
            Path::new("/tmp/out.mp3"),
        )
        .await;
        assert!(matches!(result, Err(PodrelayError::FileNotFound(_))));
    }
}
