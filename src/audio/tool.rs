use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SilenceConfig;
use crate::error::{PodrelayError, Result};

use super::{extract, probe, SilentInterval};

/// Media analysis and lossless copy backend.
#[async_trait]
pub trait MediaTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Total duration of `path`.
    async fn duration(&self, path: &Path) -> Result<Duration>;

    /// Silent intervals of `path`, ordered by start time.
    async fn silences(&self, path: &Path, config: &SilenceConfig) -> Result<Vec<SilentInterval>>;

    /// Copy `[start, end)` of `source` to `output` without re-encoding.
    async fn copy_segment(
        &self,
        source: &Path,
        start: Duration,
        end: Option<Duration>,
        output: &Path,
    ) -> Result<()>;
}

/// Subprocess-backed tool using `ffprobe` and `ffmpeg` from `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegTool;

impl FfmpegTool {
    pub fn new() -> Self {
        Self
    }

    /// Verify both binaries are installed.
    pub async fn check(&self) -> Result<()> {
        probe::check_ffmpeg().await?;
        probe::check_ffprobe().await
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn duration(&self, path: &Path) -> Result<Duration> {
        probe::get_duration(path).await
    }

    async fn silences(&self, path: &Path, config: &SilenceConfig) -> Result<Vec<SilentInterval>> {
        probe::find_silences(path, config).await
    }

    async fn copy_segment(
        &self,
        source: &Path,
        start: Duration,
        end: Option<Duration>,
        output: &Path,
    ) -> Result<()> {
        extract::copy_segment(source, start, end, output).await
    }
}

/// A call observed by [`CannedTool`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Duration(PathBuf),
    Silences(PathBuf),
    Copy {
        source: PathBuf,
        start: Duration,
        end: Option<Duration>,
        output: PathBuf,
    },
}

/// In-process stand-in for [`FfmpegTool`].
///
/// Models a constant-bitrate stream: a file's duration is its size divided by
/// `bytes_per_sec`, and a copied segment gets `length * bytes_per_sec` zero bytes.
#[derive(Debug)]
pub struct CannedTool {
    bytes_per_sec: f64,
    silences: std::result::Result<Vec<SilentInterval>, String>,
    part_sizes: HashMap<usize, u64>,
    calls: Mutex<Vec<ToolCall>>,
}

impl CannedTool {
    pub fn new(bytes_per_sec: f64) -> Self {
        Self {
            bytes_per_sec,
            silences: Ok(Vec::new()),
            part_sizes: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Silences returned for every file.
    pub fn with_silences(mut self, silences: Vec<SilentInterval>) -> Self {
        self.silences = Ok(silences);
        self
    }

    /// Make silence detection fail with a probe error.
    pub fn with_silence_failure(mut self, message: impl Into<String>) -> Self {
        self.silences = Err(message.into());
        self
    }

    /// Force the `index`-th copy (0-based) to write exactly `bytes` bytes.
    pub fn with_part_size(mut self, index: usize, bytes: u64) -> Self {
        self.part_sizes.insert(index, bytes);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: ToolCall) -> usize {
        match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(call);
                calls
                    .iter()
                    .filter(|c| matches!(c, ToolCall::Copy { .. }))
                    .count()
            }
            Err(_) => 0,
        }
    }

    async fn size_of(path: &Path) -> Result<u64> {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .map_err(|e| PodrelayError::Probe(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl MediaTool for CannedTool {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn duration(&self, path: &Path) -> Result<Duration> {
        self.record(ToolCall::Duration(path.to_path_buf()));
        let size = Self::size_of(path).await?;
        Ok(Duration::from_secs_f64(size as f64 / self.bytes_per_sec))
    }

    async fn silences(&self, path: &Path, _config: &SilenceConfig) -> Result<Vec<SilentInterval>> {
        self.record(ToolCall::Silences(path.to_path_buf()));
        Self::size_of(path).await?;
        self.silences.clone().map_err(PodrelayError::Probe)
    }

    async fn copy_segment(
        &self,
        source: &Path,
        start: Duration,
        end: Option<Duration>,
        output: &Path,
    ) -> Result<()> {
        let copies = self.record(ToolCall::Copy {
            source: source.to_path_buf(),
            start,
            end,
            output: output.to_path_buf(),
        });

        let source_size = Self::size_of(source)
            .await
            .map_err(|e| PodrelayError::Extraction(e.to_string()))?;
        let total = source_size as f64 / self.bytes_per_sec;
        let stop = end.map_or(total, |e| e.as_secs_f64().min(total));
        let natural = ((stop - start.as_secs_f64()).max(0.0) * self.bytes_per_sec).round() as u64;

        let bytes = self
            .part_sizes
            .get(&copies.saturating_sub(1))
            .copied()
            .unwrap_or(natural);

        tokio::fs::write(output, vec![0u8; bytes as usize]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_canned_duration_follows_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, vec![0u8; 4_000]).unwrap();

        let tool = CannedTool::new(200.0);
        assert_eq!(tool.duration(&path).await.unwrap(), Duration::from_secs(20));
        assert_eq!(tool.calls(), vec![ToolCall::Duration(path)]);
    }

    #[tokio::test]
    async fn test_canned_silence_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"data").unwrap();

        let tool = CannedTool::new(1.0).with_silence_failure("filter crashed");
        let result = tool.silences(&path, &SilenceConfig::default()).await;
        assert!(matches!(result, Err(PodrelayError::Probe(msg)) if msg == "filter crashed"));
    }

    #[tokio::test]
    async fn test_canned_copy_to_end_of_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.mp3");
        let output = dir.path().join("b.mp3");
        std::fs::write(&source, vec![0u8; 1_000]).unwrap();

        let tool = CannedTool::new(10.0);
        tool.copy_segment(&source, Duration::from_secs(60), None, &output)
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&output).unwrap().len(), 400);
    }

    #[test]
    fn test_ffmpeg_tool_name() {
        assert_eq!(FfmpegTool::new().name(), "ffmpeg");
    }
}
