//! Application configuration
//!
//! A single versioned JSON file under the data directory. Loading applies
//! in-place migrations when the stored version is behind, then rewrites the
//! file at the current schema.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::filter::FilterConfig;
use crate::index::DEFAULT_INDEX_PATH;

/// File name of the config inside the data directory.
pub const CONFIG_FILE: &str = "codeblock.json";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Logging level
	pub log_level: String,

	/// Where the search index is persisted, relative to an indexed tree
	pub index_path: String,

	/// Default include/exclude rules for captures and index builds
	#[serde(default)]
	pub filter: FilterConfig,
}

impl AppConfig {
	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: AppConfig = serde_json::from_str(&json)?;

			// Apply migrations if needed
			if config.version < Self::target_version() {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	/// Load or create configuration
	pub fn load_or_create(data_dir: &Path) -> Result<Self> {
		Self::load_from(data_dir).or_else(|_| {
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		})
	}

	/// Create default configuration with specific data directory
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			index_path: DEFAULT_INDEX_PATH.to_string(),
			filter: FilterConfig::default(),
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	fn target_version() -> u32 {
		1
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				// v0 predates configurable index placement
				if self.index_path.is_empty() {
					self.index_path = DEFAULT_INDEX_PATH.to_string();
				}
				self.version = 1;
				Ok(())
			}
			1 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}

impl Default for AppConfig {
	fn default() -> Self {
		let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
		Self::default_with_dir(data_dir)
	}
}

/// Platform data directory for this application.
pub fn default_data_dir() -> Result<PathBuf> {
	dirs::data_dir()
		.map(|dir| dir.join("codeblock"))
		.ok_or_else(|| anyhow!("Could not determine data directory"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn load_creates_a_default_config_when_missing() {
		let dir = tempfile::tempdir().unwrap();

		let config = AppConfig::load_from(dir.path()).unwrap();

		assert_eq!(config.version, 1);
		assert_eq!(config.index_path, DEFAULT_INDEX_PATH);
		assert!(dir.path().join(CONFIG_FILE).exists());
	}

	#[test]
	fn saved_configs_round_trip() {
		let dir = tempfile::tempdir().unwrap();

		let mut config = AppConfig::default_with_dir(dir.path().to_path_buf());
		config.log_level = "debug".to_string();
		config.filter.exclude.push("**/target/**".to_string());
		config.save().unwrap();

		let loaded = AppConfig::load_from(dir.path()).unwrap();
		assert_eq!(loaded.log_level, "debug");
		assert_eq!(loaded.filter.exclude, vec!["**/target/**".to_string()]);
	}

	#[test]
	fn old_versions_are_migrated_on_load() {
		let dir = tempfile::tempdir().unwrap();
		let stored = serde_json::json!({
			"version": 0,
			"data_dir": dir.path(),
			"log_level": "info",
			"index_path": "",
		});
		fs::write(
			dir.path().join(CONFIG_FILE),
			serde_json::to_string_pretty(&stored).unwrap(),
		)
		.unwrap();

		let config = AppConfig::load_from(dir.path()).unwrap();

		assert_eq!(config.version, 1);
		assert_eq!(config.index_path, DEFAULT_INDEX_PATH);

		// The migrated config is written back
		let rewritten: serde_json::Value =
			serde_json::from_str(&fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap())
				.unwrap();
		assert_eq!(rewritten["version"], 1);
	}

	#[test]
	fn future_versions_load_unchanged() {
		let dir = tempfile::tempdir().unwrap();
		let stored = serde_json::json!({
			"version": 99,
			"data_dir": dir.path(),
			"log_level": "info",
			"index_path": DEFAULT_INDEX_PATH,
		});
		fs::write(
			dir.path().join(CONFIG_FILE),
			serde_json::to_string(&stored).unwrap(),
		)
		.unwrap();

		// 99 is above the target version, so no migration runs and the
		// config loads as-is.
		let config = AppConfig::load_from(dir.path()).unwrap();
		assert_eq!(config.version, 99);
	}
}
