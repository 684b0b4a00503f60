use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use larder_core::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteBackend {
    OpenFoodFacts,
    Http,
}

#[derive(Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub remote: RemoteBackend,
    pub remote_url: Option<String>,
    pub sync: SyncConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = match env("LARDER_DB") {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => {
                let proj_dirs = ProjectDirs::from("", "", "larder")
                    .context("Could not determine home directory")?;
                let data_dir = proj_dirs.data_dir().to_path_buf();
                std::fs::create_dir_all(&data_dir).with_context(|| {
                    format!("Failed to create data directory: {}", data_dir.display())
                })?;
                data_dir.join("larder.db")
            }
        };

        let remote = match env("LARDER_REMOTE").as_deref().map(str::trim) {
            None | Some("" | "openfoodfacts" | "off") => RemoteBackend::OpenFoodFacts,
            Some("http") => RemoteBackend::Http,
            Some(other) => bail!("Unknown LARDER_REMOTE '{other}'. Must be one of: openfoodfacts, http"),
        };
        let remote_url = env("LARDER_REMOTE_URL").filter(|u| !u.trim().is_empty());
        if remote == RemoteBackend::Http && remote_url.is_none() {
            bail!("LARDER_REMOTE=http requires LARDER_REMOTE_URL");
        }

        let mut sync = SyncConfig::default();
        if let Some(locale) = env("LARDER_LOCALE").filter(|l| !l.trim().is_empty()) {
            sync = sync.with_default_locale(locale.trim());
        }
        if let Some(hours) = env("LARDER_FRESHNESS_HOURS") {
            let hours: u64 = hours
                .trim()
                .parse()
                .with_context(|| format!("Invalid LARDER_FRESHNESS_HOURS '{hours}'"))?;
            let secs = hours
                .checked_mul(60 * 60)
                .with_context(|| format!("LARDER_FRESHNESS_HOURS '{hours}' is too large"))?;
            sync = sync.with_freshness_window(Duration::from_secs(secs));
        }
        if let Some(secs) = env("LARDER_REMOTE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid LARDER_REMOTE_TIMEOUT_SECS '{secs}'"))?;
            if secs == 0 {
                bail!("LARDER_REMOTE_TIMEOUT_SECS must be at least 1");
            }
            sync = sync.with_remote_timeout(Duration::from_secs(secs));
        }

        Ok(Config {
            db_path,
            remote,
            remote_url,
            sync,
        })
    }
}
