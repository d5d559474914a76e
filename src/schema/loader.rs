//! Schema loader reading model configurations from disk
//!
//! - One `<slug>.json` file per model (a file may also hold an array)
//! - Files load in name order so definitions are deterministic
//! - Malformed files fail the whole load

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::model::ModelConfig;
use crate::error::{DataError, DataResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    One(ModelConfig),
    Many(Vec<ModelConfig>),
}

fn malformed(path: &Path, reason: impl std::fmt::Display) -> DataError {
    DataError::schema(format!("{}: {}", path.display(), reason))
}

/// Loads model configuration files from a directory.
pub struct SchemaLoader {
    schema_dir: PathBuf,
}

impl SchemaLoader {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
        }
    }

    /// Returns the schema directory path.
    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Loads every `*.json` file. A missing directory holds no models.
    pub fn load_all(&self) -> DataResult<Vec<ModelConfig>> {
        if !self.schema_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.schema_dir).map_err(|e| {
            malformed(&self.schema_dir, format!("Failed to read schema directory: {}", e))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                malformed(&self.schema_dir, format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();

            // Skip non-JSON files
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        let mut configs = Vec::new();
        for path in paths {
            configs.extend(Self::load_file(&path)?);
        }
        Ok(configs)
    }

    /// Loads a single schema file.
    pub fn load_file(path: &Path) -> DataResult<Vec<ModelConfig>> {
        let content = fs::read_to_string(path)
            .map_err(|e| malformed(path, format!("Failed to read file: {}", e)))?;

        let parsed: SchemaFile = serde_json::from_str(&content)
            .map_err(|e| malformed(path, format!("Invalid JSON: {}", e)))?;

        Ok(match parsed {
            SchemaFile::One(config) => vec![config],
            SchemaFile::Many(configs) => configs,
        })
    }

    /// Saves a model configuration as `<slug>.json`.
    pub fn save(&self, config: &ModelConfig) -> DataResult<PathBuf> {
        if !self.schema_dir.exists() {
            fs::create_dir_all(&self.schema_dir).map_err(|e| {
                malformed(&self.schema_dir, format!("Failed to create schema directory: {}", e))
            })?;
        }

        let path = self.schema_dir.join(format!("{}.json", config.slug));
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| malformed(&path, format!("Failed to serialize model: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| malformed(&path, format!("Failed to write file: {}", e)))?;

        Ok(path)
    }
}
