use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use podrelay::audio::FfmpegTool;
use podrelay::config::Config;
use podrelay::split::{EpisodeSplitter, SplitOutcome, SplitStrategy};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "podrelay")]
#[command(version, about = "Split oversized podcast episodes at silences")]
#[command(
    long_about = "Split episodes larger than a size threshold into lossless parts, cutting at silences near the ideal split points."
)]
struct Cli {
    /// Episode audio files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Size threshold in MB; larger files are split
    #[arg(short, long)]
    threshold_mb: Option<f64>,

    /// Maximum distance in seconds between an ideal cut and the silence used
    #[arg(long)]
    max_drift: Option<f64>,

    /// Silence noise floor in dB (e.g. -30)
    #[arg(long, allow_hyphen_values = true)]
    noise_db: Option<f64>,

    /// Minimum silence length in seconds
    #[arg(long)]
    min_silence: Option<f64>,

    /// Number of episodes split concurrently
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.threshold_mb {
            config.size_threshold_mb = v;
        }
        if let Some(v) = self.max_drift {
            config.max_drift_secs = v;
        }
        if let Some(v) = self.noise_db {
            config.noise_db = v;
        }
        if let Some(v) = self.min_silence {
            config.min_silence_secs = v;
        }
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn print_summary(outcomes: &[SplitOutcome]) {
    println!();
    for outcome in outcomes {
        let how = match &outcome.strategy {
            SplitStrategy::Unsplit => "under threshold".to_string(),
            SplitStrategy::SilenceAligned { cuts } => format!(
                "cut at [{}]",
                cuts.iter()
                    .map(|c| format!("{c:.1}s"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            SplitStrategy::Bisected => "bisected (silence detection failed)".to_string(),
        };
        println!("  {} ({})", outcome.source.display(), how);
        if outcome.is_split() {
            for part in &outcome.parts {
                println!("    -> {}", part.display());
            }
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;
    cli.apply(&mut config);
    config
        .validate()
        .context("Configuration validation failed")?;

    for input in &cli.inputs {
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }
    }

    let tool = FfmpegTool::new();
    tool.check()
        .await
        .context("FFmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)")?;

    info!("Threshold: {:.1} MB", config.size_threshold_mb);
    info!("Max drift: {:.1}s", config.max_drift_secs);
    info!(
        "Silence:   {} dB for {:.2}s",
        config.noise_db, config.min_silence_secs
    );

    let splitter = Arc::new(EpisodeSplitter::new(Arc::new(tool), config.split_config()));
    let semaphore = Arc::new(Semaphore::new(config.concurrency));

    let progress = if cli.json {
        None
    } else {
        let pb = ProgressBar::new(cli.inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} episodes")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    };

    let mut futures = FuturesUnordered::new();
    for (index, input) in cli.inputs.iter().cloned().enumerate() {
        let sem = semaphore.clone();
        let splitter = splitter.clone();
        let pb = progress.clone();

        futures.push(async move {
            let _permit = sem.acquire_owned().await.ok();
            let result = splitter.split(&input).await;
            if let Some(pb) = pb {
                pb.inc(1);
            }
            (index, input, result)
        });
    }

    let mut outcomes = Vec::new();
    let mut failures = 0usize;
    while let Some((index, input, result)) = futures.next().await {
        match result {
            Ok(outcome) => outcomes.push((index, outcome)),
            Err(e) => {
                failures += 1;
                error!("{}: {}", input.display(), e);
            }
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    outcomes.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<SplitOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcomes).context("Failed to encode outcome")?
        );
    } else {
        print_summary(&outcomes);
    }

    if failures > 0 {
        anyhow::bail!("{} of {} episodes failed to split", failures, cli.inputs.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "podrelay",
            "--threshold-mb",
            "20",
            "--noise-db",
            "-40",
            "episode.mp3",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.size_threshold_mb, 20.0);
        assert_eq!(config.noise_db, -40.0);
        assert_eq!(config.max_drift_secs, 10.0);
        assert_eq!(cli.inputs, vec![PathBuf::from("episode.mp3")]);
    }

    #[test]
    fn test_cli_requires_input() {
        assert!(Cli::try_parse_from(["podrelay"]).is_err());
    }
}
