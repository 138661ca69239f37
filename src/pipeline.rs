use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::episode::{
    part_archive_id, part_caption, path_to_title, sanitize_content, sanitize_episode,
    tweet_status, Episode,
};
use crate::error::{PodrelayError, Result};
use crate::split::{EpisodeSplitter, SplitStrategy};

/// One part handed to the messaging relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartUpload {
    pub path: PathBuf,
    pub channel: String,
    pub caption: String,
    pub performer: String,
    pub title: String,
    /// 1-based part number, doubles as the track number.
    pub part: usize,
    pub total: usize,
}

/// Identifiers returned by the relay for a delivered part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub file_id: String,
    pub message_id: i64,
}

/// Row persisted for every relayed (or failed) part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub archive_id: String,
    pub observation: String,
    pub success: bool,
    pub file_id: String,
}

/// Messaging channel that receives episode audio.
#[async_trait]
pub trait EpisodeRelay: Send + Sync {
    async fn send_part(&self, part: &PartUpload) -> Result<Delivery>;
}

/// Where an episode's parts are relayed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    /// Feed title, sent as the performer of every part.
    pub feed_title: String,
    pub channel: String,
    /// Appended to the status text of each delivered part.
    pub hashtags: Vec<String>,
}

impl RelayTarget {
    pub fn new(feed_title: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            feed_title: feed_title.into(),
            channel: channel.into(),
            hashtags: Vec::new(),
        }
    }

    pub fn with_hashtags(mut self, hashtags: Vec<String>) -> Self {
        self.hashtags = hashtags;
        self
    }
}

/// Store of upload outcomes, used for deduplication across runs.
///
/// `is_processed` is an exact lookup. Split episodes are stored under their
/// per-part ids, which [`filter_new_episodes`] checks for separately.
#[async_trait]
pub trait UploadLedger: Send + Sync {
    async fn record(&self, record: &UploadRecord) -> Result<()>;
    async fn is_processed(&self, archive_id: &str) -> Result<bool>;
}

/// Outcome of relaying one part.
#[derive(Debug, Clone, Serialize)]
pub struct PartReport {
    pub archive_id: String,
    pub delivery: Option<Delivery>,
    /// Social-network status pointing at the delivered message.
    pub status: Option<String>,
    pub error: Option<String>,
}

impl PartReport {
    pub fn is_success(&self) -> bool {
        self.delivery.is_some()
    }
}

/// Outcome of relaying one episode.
#[derive(Debug, Clone, Serialize)]
pub struct RelayReport {
    pub archive_id: String,
    pub strategy: SplitStrategy,
    pub parts: Vec<PartReport>,
}

impl RelayReport {
    pub fn all_delivered(&self) -> bool {
        self.parts.iter().all(PartReport::is_success)
    }
}

/// Drop episodes the ledger has already seen, whether relayed whole or in parts.
pub async fn filter_new_episodes(
    ledger: &dyn UploadLedger,
    episodes: Vec<Episode>,
) -> Result<Vec<Episode>> {
    let mut fresh = Vec::with_capacity(episodes.len());
    for episode in episodes {
        let id = &episode.archive_id;
        if ledger.is_processed(id).await?
            || ledger.is_processed(&part_archive_id(id, 1, 2)).await?
        {
            continue;
        }
        fresh.push(episode);
    }
    Ok(fresh)
}

/// Split a downloaded episode, relay every part and record each outcome.
///
/// Part files are deleted once sent (or once sending failed) and the source is
/// deleted at the end, even when the ledger fails; the first ledger error is
/// returned after cleanup. A split failure is recorded once for the whole
/// episode and returned to the caller.
pub async fn relay_episode(
    splitter: &EpisodeSplitter,
    relay: &dyn EpisodeRelay,
    ledger: &dyn UploadLedger,
    target: &RelayTarget,
    episode: &Episode,
    audio: &Path,
) -> Result<RelayReport> {
    let outcome = match splitter.split(audio).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{} failed to split: {}", episode.archive_id, e);
            let record = UploadRecord {
                archive_id: episode.archive_id.clone(),
                observation: sanitize_content(&e.to_string()),
                success: false,
                file_id: String::new(),
            };
            if let Err(ledger_err) = ledger.record(&record).await {
                warn!("Failed to record {}: {}", record.archive_id, ledger_err);
            }
            return Err(e);
        }
    };

    let total = outcome.parts.len();
    let caption = episode.caption();
    let title = match sanitize_episode(&episode.title) {
        t if t.is_empty() => path_to_title(audio),
        t => t,
    };
    let hashtags: Vec<&str> = target.hashtags.iter().map(String::as_str).collect();
    let mut reports = Vec::with_capacity(total);
    let mut ledger_error: Option<PodrelayError> = None;

    for (index, path) in outcome.parts.iter().enumerate() {
        let part = index + 1;
        let archive_id = part_archive_id(&episode.archive_id, part, total);
        let upload = PartUpload {
            path: path.clone(),
            channel: target.channel.clone(),
            caption: part_caption(&caption, part, total),
            performer: target.feed_title.clone(),
            title: if total > 1 {
                format!("{} ({}/{})", title, part, total)
            } else {
                title.clone()
            },
            part,
            total,
        };

        let (record, report) = match relay.send_part(&upload).await {
            Ok(delivery) => {
                info!("{} uploaded", archive_id);
                let status =
                    tweet_status(&upload.title, &target.channel, delivery.message_id, &hashtags);
                (
                    UploadRecord {
                        archive_id: archive_id.clone(),
                        observation: String::new(),
                        success: true,
                        file_id: delivery.file_id.clone(),
                    },
                    PartReport {
                        archive_id,
                        delivery: Some(delivery),
                        status: Some(status),
                        error: None,
                    },
                )
            }
            Err(e) => {
                warn!("{} failed to upload: {}", archive_id, e);
                (
                    UploadRecord {
                        archive_id: archive_id.clone(),
                        observation: sanitize_content(&e.to_string()),
                        success: false,
                        file_id: String::new(),
                    },
                    PartReport {
                        archive_id,
                        delivery: None,
                        status: None,
                        error: Some(e.to_string()),
                    },
                )
            }
        };

        if let Err(e) = ledger.record(&record).await {
            warn!("Failed to record {}: {}", record.archive_id, e);
            ledger_error.get_or_insert(e);
        }
        reports.push(report);

        if path != audio {
            remove_quietly(path).await;
        }
    }

    remove_quietly(audio).await;

    if let Some(e) = ledger_error {
        return Err(e);
    }

    Ok(RelayReport {
        archive_id: episode.archive_id.clone(),
        strategy: outcome.strategy,
        parts: reports,
    })
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
