use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SilenceConfig;
use crate::error::{PodrelayError, Result};

use super::SilentInterval;

/// Number of trailing stderr lines kept in probe error messages.
const STDERR_TAIL_LINES: usize = 8;

/// Check if FFmpeg is installed and accessible.
pub async fn check_ffmpeg() -> Result<()> {
    check_binary("ffmpeg").await
}

/// Check if FFprobe is installed and accessible.
pub async fn check_ffprobe() -> Result<()> {
    check_binary("ffprobe").await
}

async fn check_binary(name: &str) -> Result<()> {
    let output = Command::new(name)
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            PodrelayError::Probe(format!(
                "{name} not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(PodrelayError::Probe(format!("{name} check failed")));
    }

    debug!("{} is available", name);
    Ok(())
}

/// Get audio duration using FFprobe.
pub async fn get_duration(input: &Path) -> Result<Duration> {
    if !input.exists() {
        return Err(PodrelayError::Probe(format!(
            "{} does not exist",
            input.display()
        )));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .await
        .map_err(|e| PodrelayError::Probe(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PodrelayError::Probe(format!(
            "FFprobe failed on {}: {}",
            input.display(),
            stderr_tail(&stderr)
        )));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    let secs: f64 = trimmed
        .parse()
        .map_err(|e| PodrelayError::Probe(format!("Failed to parse duration '{trimmed}': {e}")))?;

    if !secs.is_finite() || secs < 0.0 {
        return Err(PodrelayError::Probe(format!(
            "FFprobe reported an unusable duration: {trimmed}"
        )));
    }

    Ok(Duration::from_secs_f64(secs))
}

/// Scan the whole file with FFmpeg's `silencedetect` filter.
pub async fn find_silences(input: &Path, config: &SilenceConfig) -> Result<Vec<SilentInterval>> {
    if !input.exists() {
        return Err(PodrelayError::Probe(format!(
            "{} does not exist",
            input.display()
        )));
    }

    let filter = format!(
        "silencedetect=noise={}dB:d={}",
        config.noise_db,
        config.min_duration.as_secs_f64()
    );

    info!("Scanning {} for silences ({})", input.display(), filter);

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-nostats", "-i"])
        .arg(input)
        .args(["-vn", "-af"])
        .arg(&filter)
        .args(["-f", "null", "-"])
        .stdout(Stdio::null())
        .output()
        .await
        .map_err(|e| PodrelayError::Probe(format!("Failed to run FFmpeg: {e}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(PodrelayError::Probe(format!(
            "Silence detection failed on {}: {}",
            input.display(),
            stderr_tail(&stderr)
        )));
    }

    let silences = parse_silence_log(&stderr);
    info!("Found {} silences in {}", silences.len(), input.display());
    Ok(silences)
}

fn silence_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"silence_start:\s*(-?\d+(?:\.\d+)?)").expect("valid regex"))
}

fn silence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"silence_end:\s*(-?\d+(?:\.\d+)?)").expect("valid regex"))
}

/// Parse `silencedetect` log output into closed silent intervals.
///
/// A silence is emitted only once both its start and end lines have been seen;
/// one still open at end of stream is dropped.
pub fn parse_silence_log(log: &str) -> Vec<SilentInterval> {
    let mut silences = Vec::new();
    let mut current_start: Option<f64> = None;

    for line in log.lines() {
        if let Some(start) = capture_secs(silence_start_re(), line) {
            if current_start.is_some() {
                debug!("Silence start at {:.3}s replaces an unclosed one", start);
            }
            current_start = Some(start.max(0.0));
        }

        if let Some(end) = capture_secs(silence_end_re(), line) {
            match current_start.take() {
                Some(start) if end > start => {
                    silences.push(SilentInterval::from_secs_f64(start, end));
                }
                Some(start) => {
                    warn!("Dropping empty silence {:.3}s..{:.3}s", start, end);
                }
                None => debug!("Ignoring silence end at {:.3}s with no start", end),
            }
        }
    }

    if let Some(start) = current_start {
        debug!("Discarding silence at {:.3}s that never closed", start);
    }

    silences
}

fn capture_secs(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}
