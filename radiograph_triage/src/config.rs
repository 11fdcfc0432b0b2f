// THEORY:
// One serde-backed configuration tree for the whole engine. Every field has a
// default that reproduces the reference deployment, so an empty JSON object is a
// valid configuration and callers only spell out what they change.

use crate::core_modules::classification::PATHOGEN_A;
use crate::core_modules::contrast::ContrastMode;
use crate::core_modules::inference::InferenceConfig;
use crate::core_modules::protocol::ProtocolTable;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    pub contrast: ContrastMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Pathogen whose protocol is shown when a model only reports "abnormal".
    pub presumptive_pathogen: String,
    /// Reference table file. The embedded table is used when unset.
    pub table_path: Option<PathBuf>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            presumptive_pathogen: PATHOGEN_A.to_string(),
            table_path: None,
        }
    }
}

impl ProtocolConfig {
    pub fn load_table(&self) -> Result<ProtocolTable, ConfigError> {
        match &self.table_path {
            Some(path) => ProtocolTable::from_path(path),
            None => ProtocolTable::embedded(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub enhancer: EnhancerConfig,
    pub inference: InferenceConfig,
    pub protocols: ProtocolConfig,
}

impl TriageConfig {
    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: origin.clone(),
            source,
        })?;
        Self::from_json_str(&json, &origin)
    }

    /// Checks settings that do not depend on the protocol table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.enhancer.contrast.validate()?;
        self.inference.validate()
    }
}
