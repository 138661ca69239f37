use std::path::Path;

use serde::{Deserialize, Serialize};

/// Longest caption sent alongside an episode.
pub const CAPTION_LIMIT: usize = 200;

/// Longest social-network status.
pub const STATUS_LIMIT: usize = 280;

const STATUS_BODY: &str = "\nTe lo perdiste? Está en Telegram: ";

/// One podcast item from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub title: String,
    pub description: String,
    pub url: String,
    /// Stable identity derived from the enclosure file name.
    pub archive_id: String,
    pub image_url: Option<String>,
}

impl Episode {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        image_url: Option<String>,
    ) -> Self {
        let url = url.into();
        Self {
            archive_id: archive_id_from_url(&url),
            title: title.into(),
            description: description.into(),
            url,
            image_url: image_url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// HTML caption: bold title, then the description, capped at [`CAPTION_LIMIT`] chars.
    pub fn caption(&self) -> String {
        let content = format!("<b>{}</b>\n{}", self.title, self.description);
        truncate_with_ellipsis(&content, CAPTION_LIMIT)
    }
}

/// File name of the enclosure between the last `/` and `.mp3`.
pub fn archive_id_from_url(url: &str) -> String {
    let name = url.rsplit('/').next().unwrap_or(url);
    match name.rfind(".mp3") {
        Some(end) => name[..end].to_string(),
        None => name.to_string(),
    }
}

/// Make an episode title safe as a file name or track title.
pub fn sanitize_episode(title: &str) -> String {
    title.replace('/', "-").trim().to_string()
}

/// Escape and flatten free text for folder names and stored observations.
pub fn sanitize_content(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => {}
            ' ' => out.push('_'),
            'á' | 'Á' => out.push('a'),
            'é' | 'É' => out.push('e'),
            'í' | 'Í' => out.push('i'),
            'ó' | 'Ó' => out.push('o'),
            'ú' | 'Ú' => out.push('u'),
            other => out.push(other),
        }
    }
    out
}

/// Human title from a file path: the stem with underscores as spaces.
pub fn path_to_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}

/// Record id for one part; unsplit episodes keep the bare archive id.
pub fn part_archive_id(archive_id: &str, part: usize, total: usize) -> String {
    if total <= 1 {
        archive_id.to_string()
    } else {
        format!("{archive_id}_parte_{part}")
    }
}

/// Caption for one part; unsplit episodes keep the episode caption.
pub fn part_caption(caption: &str, part: usize, total: usize) -> String {
    if total <= 1 {
        caption.to_string()
    } else {
        format!("{caption}\n(Parte {part}/{total})")
    }
}

/// Status text pointing at the relayed message, kept within [`STATUS_LIMIT`] chars.
///
/// The full form is tried first, then one without the body line, then one with
/// the title shortened.
pub fn tweet_status(title: &str, channel: &str, message_id: i64, hashtags: &[&str]) -> String {
    let url = format!("https://t.me/{}/{}", channel.trim_start_matches('@'), message_id);
    let tags = if hashtags.is_empty() {
        String::new()
    } else {
        format!("\n{}", hashtags.join(" "))
    };

    let full = format!("{title}{STATUS_BODY}{url}{tags}");
    if full.chars().count() <= STATUS_LIMIT {
        return full;
    }

    let title_budget = STATUS_LIMIT
        .saturating_sub(url.chars().count())
        .saturating_sub(tags.chars().count())
        .saturating_sub(1);
    let title = truncate_with_ellipsis(title, title_budget);
    format!("{title}\n{url}{tags}")
}

fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
