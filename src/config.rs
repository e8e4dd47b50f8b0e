use std::path::PathBuf;

/// Journal file name inside the data directory.
const JOURNAL_FILE: &str = "innkeep.journal";

/// Process configuration, read from `INNKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Prometheus exporter port; metrics are off when unset.
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("INNKEEP_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port = lookup("INNKEEP_METRICS_PORT").and_then(|s| s.parse().ok());
        Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(JOURNAL_FILE)
    }
}
