use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Service configuration, loadable from a TOML file. CLI flags override
/// file values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// HTTP endpoint returning the identity snapshot as a JSON array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_url: Option<String>,
    /// Path to the upstream accounts database file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_db: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            directory_url: None,
            directory_db: None,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("bibstack.db")
    }
}
