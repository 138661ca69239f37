pub mod audio;
pub mod config;
pub mod episode;
pub mod error;
pub mod pipeline;
pub mod split;

pub use config::{Config, SilenceConfig, SplitConfig};
pub use error::{PodrelayError, Result};
pub use pipeline::{
    filter_new_episodes, relay_episode, Delivery, EpisodeRelay, PartUpload, RelayReport,
    RelayTarget, UploadLedger, UploadRecord,
};
pub use split::{EpisodeSplitter, SplitOutcome, SplitStrategy};
