//! Configuration file support for mbatch
//!
//! Supports `.mbatch.yaml` files that can be placed anywhere in the directory
//! hierarchy. mbatch searches from the working directory upward to the
//! filesystem root and uses the first file it finds.

use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::commands::apply::ApplyStrategy;

/// The name of the config file mbatch looks for
pub const CONFIG_FILE_NAME: &str = ".mbatch.yaml";

/// Root configuration structure for .mbatch.yaml
///
/// Every field is optional; command-line flags override what is set here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MbatchConfig {
	/// Namespace the batch is applied into
	pub namespace: Option<String>,

	/// Kubeconfig context to use
	pub context: Option<String>,

	pub field_manager: Option<String>,

	pub apply_strategy: Option<ApplyStrategy>,

	pub force: Option<bool>,

	/// Template data shared by every template, lowest precedence
	#[serde(default)]
	pub values: BTreeMap<String, serde_yaml::Value>,
}

impl MbatchConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		if let Some(config_path) = find_config_file(start_dir) {
			tracing::debug!(path = %config_path.display(), "loading config file");
			let config = Self::load_from_file(&config_path)?;
			Ok(Some(config))
		} else {
			Ok(None)
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		// An empty file is a valid, empty config
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		let config: MbatchConfig = serde_yaml::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))?;
		Ok(config)
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let mut current = start_dir.to_path_buf();

	// Canonicalize if possible to handle relative paths
	if let Ok(canonical) = current.canonicalize() {
		current = canonical;
	}

	loop {
		let config_path = current.join(CONFIG_FILE_NAME);
		if config_path.is_file() {
			return Some(config_path);
		}

		match current.parent() {
			Some(parent) if parent != current => current = parent.to_path_buf(),
			_ => return None,
		}
	}
}
