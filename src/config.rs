use crate::session::SessionOptions;
use crate::sync::CheckpointPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of `mirrordb.toml`. Unset fields fall back to the session
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    pub database: Option<String>,
    /// JSON schema description; fetched from the source when unset
    pub schema: Option<String>,
    /// Directory served by the file-backed remote
    pub source: Option<String>,
    pub page_size: Option<usize>,
    pub cache_ttl_secs: Option<u64>,
    pub page_delay_ms: Option<u64>,
    pub checkpoint_policy: Option<CheckpointPolicy>,
}

impl MirrorConfig {
    pub fn to_options(&self) -> SessionOptions {
        let defaults = SessionOptions::default();
        SessionOptions {
            cache_ttl: self.cache_ttl_secs.map(Duration::from_secs).unwrap_or(defaults.cache_ttl),
            page_size: self.page_size.filter(|n| *n > 0).unwrap_or(defaults.page_size),
            page_delay: self.page_delay_ms.map(Duration::from_millis).unwrap_or(defaults.page_delay),
            checkpoint_policy: self.checkpoint_policy.unwrap_or(defaults.checkpoint_policy),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("mirrordb.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".mirrordb").join("mirror.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<MirrorConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: MirrorConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &MirrorConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
