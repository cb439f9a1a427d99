//! Command-line and environment settings.

use crate::adapters::{DirectoryFeedWriter, FolderUploader, JsonlCatalog, MappingFile};
use crate::error::{CliError, CliResult};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use feedsync_engine::{Collaborators, RetryPolicy, SyncConfig};
use feedsync_types::{CountryCode, CountrySet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by every command. Each can come from a flag or from the
/// environment variable named in its help.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory holding checkpoints, mapping snapshots and variant state
    #[arg(long, global = true, env = "FEEDSYNC_STATE_DIR", default_value = ".feedsync")]
    pub state_dir: PathBuf,

    /// Retries after the first attempt of a collaborator call (0-10)
    #[arg(long, global = true, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Delay before the first retry, in seconds
    #[arg(long, global = true, env = "BASE_RETRY_DELAY", default_value_t = 1.0)]
    pub base_retry_delay: f64,

    /// Upper bound for a single retry delay, in seconds
    #[arg(long, global = true, env = "MAX_RETRY_DELAY", default_value_t = 60.0)]
    pub max_retry_delay: f64,

    /// Feed uploads running at the same time (1-10)
    #[arg(
        long,
        global = true,
        env = "DRIVE_MAX_CONCURRENT_UPLOADS",
        default_value_t = 3
    )]
    pub max_concurrent_uploads: usize,

    /// Let mapping changes decide between FULL and INCREMENTAL in smart mode
    #[arg(
        long,
        global = true,
        env = "SMART_MAPPING_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub smart_mapping_enabled: bool,

    /// Comma-separated country codes to publish feeds for; every mapped
    /// country when unset
    #[arg(long, global = true, env = "TARGET_COUNTRIES", value_delimiter = ',')]
    pub target_countries: Option<Vec<String>>,

    /// JSON-lines catalog export to read variants from
    #[arg(long, global = true, env = "FEEDSYNC_CATALOG", default_value = "catalog.jsonl")]
    pub catalog: PathBuf,

    /// JSON file mapping locations to countries
    #[arg(long, global = true, env = "FEEDSYNC_MAPPING", default_value = "mapping.json")]
    pub mapping: PathBuf,

    /// Directory the country feeds are written to
    #[arg(long, global = true, env = "FEEDSYNC_OUTPUT_DIR", default_value = "feeds")]
    pub output_dir: PathBuf,

    /// Folder feeds are uploaded to
    #[arg(long, global = true, env = "FEEDSYNC_REMOTE_DIR", default_value = "remote")]
    pub remote_dir: PathBuf,
}

fn seconds(name: &'static str, value: f64) -> CliResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| CliError::setting(name, format!("{value}: {e}")))
}

fn target_countries(codes: &[String]) -> CliResult<CountrySet> {
    codes
        .iter()
        .map(|code| code.trim())
        .filter(|code| !code.is_empty())
        .map(|code| {
            CountryCode::new(code).map_err(|e| CliError::setting("target countries", e.to_string()))
        })
        .collect()
}

impl Settings {
    /// Engine configuration. Range checks are left to the engine, which
    /// reports every violation at once.
    pub fn sync_config(&self) -> CliResult<SyncConfig> {
        let retry = RetryPolicy::new(
            self.max_retries,
            seconds("base retry delay", self.base_retry_delay)?,
        )
        .with_max_delay(seconds("max retry delay", self.max_retry_delay)?);
        let config = SyncConfig::new()
            .with_retry(retry)
            .with_max_concurrent_uploads(self.max_concurrent_uploads)
            .with_smart_mapping(self.smart_mapping_enabled);
        match &self.target_countries {
            Some(codes) => Ok(config.with_target_countries(target_countries(codes)?)),
            None => Ok(config),
        }
    }

    /// Directory-backed collaborators.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            products: Arc::new(JsonlCatalog::new(&self.catalog)),
            feeds: Arc::new(DirectoryFeedWriter::new(&self.output_dir)),
            uploads: Arc::new(FolderUploader::new(&self.remote_dir)),
            mapping: Arc::new(MappingFile::new(&self.mapping)),
        }
    }
}
