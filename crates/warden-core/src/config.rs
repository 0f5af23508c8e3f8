//! Engine configuration: where state lives and how much history is kept.
//!
//! ```yaml
//! data_dir: /var/lib/warden
//! snapshot_retain: 2
//! location_compact_after: 64
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Fewer than two snapshots would leave nothing to fall back to.
pub const MIN_SNAPSHOT_RETAIN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WardenConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_snapshot_retain")]
    pub snapshot_retain: usize,

    #[serde(default = "default_location_compact_after")]
    pub location_compact_after: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join("warden"))
        .unwrap_or_else(|| PathBuf::from(".warden"))
}

fn default_snapshot_retain() -> usize {
    MIN_SNAPSHOT_RETAIN
}

fn default_location_compact_after() -> usize {
    64
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_retain: default_snapshot_retain(),
            location_compact_after: default_location_compact_after(),
        }
    }
}

impl WardenConfig {
    /// Defaults overridden by environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `WARDEN_DATA_DIR` | Root of the rule table and declared-permission logs |
    /// | `WARDEN_SNAPSHOT_RETAIN` | Rule snapshots kept after each save |
    /// | `WARDEN_LOCATION_COMPACT_AFTER` | Superseded record files before the declared log is compacted |
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a YAML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config.with_env_overrides().normalized())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("WARDEN_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(retain) = env_usize("WARDEN_SNAPSHOT_RETAIN") {
            self.snapshot_retain = retain;
        }
        if let Some(n) = env_usize("WARDEN_LOCATION_COMPACT_AFTER") {
            self.location_compact_after = n;
        }
        self.normalized()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_snapshot_retain(mut self, retain: usize) -> Self {
        self.snapshot_retain = retain;
        self.normalized()
    }

    pub fn table_dir(&self) -> PathBuf {
        self.data_dir.join("rules")
    }

    pub fn location_dir(&self) -> PathBuf {
        self.data_dir.join("locations")
    }

    fn normalized(mut self) -> Self {
        self.snapshot_retain = self.snapshot_retain.max(MIN_SNAPSHOT_RETAIN);
        self.location_compact_after = self.location_compact_after.max(1);
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "data_dir: /srv/warden\nsnapshot_retain: 1").unwrap();
        let config = WardenConfig::from_file(file.path()).unwrap();
        if std::env::var_os("WARDEN_DATA_DIR").is_none() {
            assert_eq!(config.data_dir, PathBuf::from("/srv/warden"));
            assert_eq!(config.table_dir(), PathBuf::from("/srv/warden/rules"));
            assert_eq!(config.location_dir(), PathBuf::from("/srv/warden/locations"));
        }
        if std::env::var_os("WARDEN_SNAPSHOT_RETAIN").is_none() {
            assert_eq!(config.snapshot_retain, MIN_SNAPSHOT_RETAIN);
        }
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "data_dir: /x\nretain_forever: true").unwrap();
        assert!(WardenConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_builders() {
        let config = WardenConfig::default()
            .with_data_dir("/tmp/w")
            .with_snapshot_retain(5);
        assert_eq!(config.snapshot_retain, 5);
        assert_eq!(config.table_dir(), PathBuf::from("/tmp/w/rules"));
        assert_eq!(WardenConfig::default().with_snapshot_retain(0).snapshot_retain, 2);
    }
}
